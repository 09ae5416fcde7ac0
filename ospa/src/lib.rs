#![cfg_attr(docsrs, feature(doc_cfg))]
//! ospa is an FSM-driven agent runtime. It orchestrates LLM calls, tool
//! invocations, and a retrieval-backed feedback memory to drive
//! multi-turn conversational agents, and distills raw Q&A corpora into a
//! chapterized, prompt-enriched knowledge hierarchy (Observation-State-
//! Prompt-Answer rows).
//!
//! The two public entry points are the chat step loop
//! ([`service::ChatService`]) and the backward pipeline
//! ([`service::BackwardService`]); everything else is the machinery they
//! share: the LLM client contract, the context and message model, the
//! tool registry, the FSM, and token accounting.

// Core data model
pub mod chapter;
pub mod error;
pub mod feedback;
pub mod fsm;
pub mod message;
pub mod qa;
pub mod usage;

// Clients
pub mod embedding;
pub mod llm;
pub mod store;

// Agents and tools
pub mod agent;
pub mod tool;

// Orchestration
pub mod service;
pub mod setting;

pub mod prelude;

// Re-export the types nearly every consumer touches.
pub use error::{Error, Result, ToolError};
pub use fsm::{Action, Memory, State, StateMachine, Step};
pub use message::{AIContext, Content, ContentPart, Message, Role};
pub use setting::Setting;
pub use usage::{TokenCounter, TokenCounterSnapshot, Usage};
