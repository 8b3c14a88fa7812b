//! Chatbot - server-rendered chat front-end
//!
//! Hosted auth (sessions in cookies), a streaming completion proxy and chat
//! transcript persistence.

pub mod api;
pub mod config;
pub mod models;
pub mod pages;
pub mod services;
