//! A small interactive command interpreter.
//!
//! A line typed at the prompt is parsed into a [`Pipeline`] of stages, the
//! first stage is checked against the builtins (`cd`, `exit`, `short`), and
//! otherwise every stage is forked as a child process, wired to its
//! neighbours with pipes and to files with `<`, `>` and `>>`. Foreground
//! pipelines are awaited; background ones (`&`) are reaped on later
//! iterations of the loop.
//!
//! The main entry point is [`Interpreter`]. The lower layers ([`parser`],
//! [`executor`], [`job`], [`line_reader`]) are public so they can be driven
//! on their own.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod executor;
mod interpreter;
pub mod job;
pub mod lexer;
pub mod line_reader;
pub mod parser;
pub mod shortcut;

pub use config::{Args, Config};
pub use env::Environment;
pub use interpreter::{Interpreter, ReturnCode};
pub use parser::{Pipeline, Stage, parse};
