// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tarkastaja Compliance Auditor Library
 * Exposes auditor modules for testing
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod config;
pub mod errors;
pub mod types;

// Egress boundary and tool plumbing
pub mod gateway;
pub mod pipeline;
pub mod sanitizer;

// External collaborators
pub mod completion;
pub mod sandbox;

// Knowledge graph
pub mod extractor;
pub mod graph;

// Audit run
pub mod analyzer;
pub mod orchestrator;
pub mod probe;
