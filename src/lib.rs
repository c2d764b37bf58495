#![crate_name = "chainwork"]
#![deny(missing_docs)]

//! # A Tiny Example
//! ```
//! use chainwork::{Chain, Config, Runtime};
//! use chainwork::ui::Inline;
//! use std::sync::mpsc;
//!
//! let runtime = Runtime::with_config(Config::default().ui(Inline));
//! let (tx, rx) = mpsc::channel();
//! runtime
//!     .task(|| Ok((1, 2, 3, 4)))
//!     .transform(|(a, b, c, d)| a * b * c * d)
//!     .on_success(move |product| tx.send(product).unwrap())
//!     .start();
//! println!("outcome: {}", rx.recv().expect("chain completes"));
//! ```
//!
//! What this does:
//! - `task`: declares the computation at the root of the chain.
//! - `transform`: declares a transformation on its value.
//! - `on_success`: declares what to do with the final value.
//!
//! None of the steps are run, until `start` is invoked.
//! `start` returns immediately; the chain runs on the background pool.
//!
//! # Outcomes
//! Each started chain ends in exactly one of these:
//! - it succeeds, and the success callback is invoked with the value,
//! - it fails, and the error callback is invoked with the [Error],
//! - it is discontinued (by a [filter](Chain::filter), or by returning [discontinue()]), and neither callback is invoked,
//! - it is cancelled through its [WorkHandle], and neither callback is invoked.
//!
//! Callbacks are invoked on the UI executor. Even a chain that ran to completion won't invoke its callbacks,
//! if it was cancelled by the time the UI executor gets to them.
//!
//! # Execution Contexts
//! Each stage runs in an [ExecutionContext]:
//! - [ExecutionContext::Background] runs on the shared background pool. This is the default.
//! - [ExecutionContext::Ui] runs on the [UiExecutor](ui::UiExecutor).
//! - [ExecutionContext::NonCancellable] runs on the background pool, and keeps this stage and every stage
//!   before it running after a cancel.
//!
//! The background pool is a [ThreadPool](threadpool::ThreadPool), one smaller than the hardware concurrency,
//! but with 2 to 6 threads. The [ui] module documents the available UI executors.
//!
//! # How To Use This
//!
//! ## Initial Element of the Chain
//! A chain starts with a computation. It returns a `Result`, so it can fail:
//! ```
//! use chainwork::{new_error, Runtime};
//!
//! let runtime = Runtime::new();
//! let chain = runtime.task(|| {
//!     let answer: u32 = "42".parse().map_err(new_error)?;
//!     Ok(answer)
//! });
//! ```
//!
//! ## Making the Chain do Actual Work
//! Stages are appended to the chain. Each stage consumes the chain, and returns a longer one.
//! ```
//! use chainwork::{Chain, Config, ExecutionContext, Runtime};
//! use chainwork::ui::Inline;
//! use std::sync::mpsc;
//!
//! let runtime = Runtime::with_config(Config::default().ui(Inline));
//! let (tx, rx) = mpsc::channel();
//! let handle = runtime
//!     .task(|| Ok(vec![3, 1, 2]))
//!     .transform(|mut v| {
//!         v.sort();
//!         v
//!     })
//!     .effect(|v| println!("sorted: {:?}", v))
//!     .filter(|v| !v.is_empty())
//!     .transform_on(ExecutionContext::Ui, |v| v.len())
//!     .on_success(move |len| tx.send(len).unwrap())
//!     .on_error(|error| eprintln!("failed: {}", error))
//!     .expect("only one error callback")
//!     .start();
//!
//! assert_eq!(3, rx.recv().unwrap());
//! handle.wait();
//! ```
//!
//! ## Composition
//! Independent computations can run side by side, and be merged into a single value.
//! ```
//! use chainwork::{Chain, Config, Runtime};
//! use chainwork::ui::Inline;
//! use std::sync::mpsc;
//!
//! let runtime = Runtime::with_config(Config::default().ui(Inline));
//! let (tx, rx) = mpsc::channel();
//! runtime
//!     .merge2(|| Ok("answer: "), || Ok(42))
//!     .merge(|label, value| format!("{}{}", label, value))
//!     .on_success(move |text| tx.send(text).unwrap())
//!     .start();
//!
//! assert_eq!("answer: 42", rx.recv().unwrap());
//! ```
//!
//! ## Producers
//! A consumer chain is started once, and then runs for each item handed to its [Producer].
//! ```
//! use chainwork::{Chain, Config, Runtime, WorkGroup};
//! use chainwork::ui::Inline;
//! use std::sync::mpsc;
//!
//! let runtime = Runtime::with_config(Config::default().ui(Inline));
//! let group = WorkGroup::new();
//! let (tx, rx) = mpsc::channel();
//! let producer = runtime
//!     .consume_by(|query: String| Ok(query.len()))
//!     .on_success(move |len| tx.send(len).unwrap())
//!     .manage_by(&group)
//!     .start();
//!
//! assert!(producer.produce(String::from("chain")));
//! assert_eq!(5, rx.recv().unwrap());
//!
//! // Closes the producer.
//! group.cancel_all_works();
//! assert!(!producer.produce(String::from("work")));
//! ```

mod chain;
mod config;
mod dispatcher;
mod errors;
mod group;
mod handle;
mod link;
#[cfg(feature = "logging")]
pub mod logging;
mod merge;
mod pipeline;
mod producer;
mod runtime;
mod scope;
mod stage;
pub mod stop_token;
mod terminal;
pub mod ui;
mod work;

pub use chain::{Chain, Out, Then};
pub use config::Config;
pub use dispatcher::{worker_count_for, Dispatcher, ExecutionContext};
pub use errors::{discontinue, new_error, BoxError, CallbackKind, Error, Result};
pub use group::WorkGroup;
pub use handle::WorkHandle;
pub use link::Link;
pub use merge::{Merge2, Merge3, Merge4, MergeAll, Merger2, Merger3, Merger4};
pub use pipeline::Pipeline;
pub use producer::{ConsumerPipeline, PoolPipeline, Producer};
pub use runtime::Runtime;
pub use scope::Scope;
pub use stage::{Effect, Filter, Operation, Stage, Transform, TryTransform};
pub use terminal::{Settings, Terminal};
pub use work::{Action, Consumer, Source, Work};
