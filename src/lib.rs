pub mod api;
pub mod app;
pub mod chat;
pub mod cli;
pub mod config;
pub mod db;
pub mod gateway;
pub mod global;
pub mod guards;
pub mod jobs;
pub mod llm;
pub mod meeting;
pub mod webhook;
