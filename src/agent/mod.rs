//! Autonomous troubleshooting agent: the bounded decide/act loop, the
//! LLM decision engine, the security-validated tool executor, and the
//! history renderer that feeds prior iterations back into each decision.

pub mod controller;
pub mod decision;
pub mod executor;
pub mod history;
pub mod security;
