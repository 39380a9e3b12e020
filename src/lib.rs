//! Opsmedic -- Autonomous Infrastructure Troubleshooting Agent
//!
//! A bounded observe/decide/act loop that diagnoses and repairs cloud
//! infrastructure failures: an LLM picks the next action from a closed
//! tool set, a security-validated executor carries it out, and the
//! result feeds back into the next decision.

pub mod types;
pub mod error;
pub mod config;
pub mod agent;
pub mod search;
