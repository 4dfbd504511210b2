//! Reference functions for the strand invoker.
//!
//! Build with `cargo build --release` and serve one of them with
//! `STRAND_FUNCTION_URI=target/release/libdemo_functions.so?handler=RunLengthEncode`.
//!
//! Plugins do not share the host's async runtime, so streaming functions
//! here run on their own threads and use the blocking channel operations.

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use strand::prelude::*;
use strand::TryRecvError;

#[cfg(not(feature = "stale-abi"))]
strand::declare_plugin!();

#[cfg(feature = "stale-abi")]
#[no_mangle]
pub static STRAND_ABI_VERSION: &str = "strand-0.0.0";

#[strand_function]
fn string_in_string_out(name: String) -> Result<String, FunctionError> {
    if name == "Riff" {
        return Err(FunctionError::new("error condition"));
    }
    Ok(format!("Hello {}", name))
}

/// A run of identical consecutive words.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rle {
    pub word: String,
    pub count: u32,
}

impl Data for Rle {}

/// Longest run accepted before reporting an error.
const MAX_RUN: u32 = 3;

#[strand_function]
fn run_length_encode(mut words: Receiver<String>) -> (Receiver<Rle>, ErrorReceiver) {
    let (out, runs) = channel::<Rle>();
    let (errors, error_rx) = error_channel();

    thread::spawn(move || {
        let mut current: Option<Rle> = None;
        while let Some(word) = words.blocking_recv() {
            match current.as_mut() {
                Some(run) if run.word == word => {
                    run.count += 1;
                    if run.count == MAX_RUN {
                        let err = FunctionError::new(format!("Too many occurrences of {}", word));
                        let _ = errors.blocking_send(err);
                        return;
                    }
                }
                _ => {
                    if let Some(done) = current.take() {
                        if out.blocking_send(done).is_err() {
                            return;
                        }
                    }
                    current = Some(Rle { word, count: 1 });
                }
            }
        }
        if let Some(done) = current {
            let _ = out.blocking_send(done);
        }
    });

    (runs, error_rx)
}

/// Emits an increasing counter every 10ms until its input closes.
#[strand_function]
fn supplier_func(mut stop: Receiver<()>) -> Receiver<i64> {
    let (out, ticks) = channel::<i64>();

    thread::spawn(move || {
        let mut i = 0;
        loop {
            match stop.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) => tracing::warn!("supplier_func ignores its input values"),
                Err(TryRecvError::Disconnected) => return,
            }
            thread::sleep(Duration::from_millis(10));
            if out.blocking_send(i).is_err() {
                return;
            }
            i += 1;
        }
    });

    ticks
}

#[strand_function]
fn direct1(s: String) -> Result<i64, std::num::ParseIntError> {
    Ok(s.trim().parse::<i64>()? * 2)
}

#[strand_function]
fn direct2(s: String) -> i64 {
    s.trim().parse::<i64>().unwrap_or(0) * 2
}

#[strand_function]
fn direct3(s: String) {
    tracing::info!("direct3 received {}", s);
}

#[strand_function]
fn direct4(s: String) -> Result<(), FunctionError> {
    if s.contains("Riff") {
        return Err(FunctionError::new(format!("{} contained 'Riff'", s)));
    }
    Ok(())
}

#[strand_function]
fn direct5() -> Result<i64, FunctionError> {
    Ok(5)
}

#[strand_function(name = "Direct5e")]
fn direct5_error() -> Result<i64, FunctionError> {
    Err(FunctionError::new("Direct5e error"))
}

#[strand_function]
fn direct6() -> i64 {
    42
}

#[strand_function]
fn direct7() {}

#[strand_function]
fn direct8() -> Result<(), FunctionError> {
    Ok(())
}

#[strand_function(name = "Direct8e")]
fn direct8_error() -> Result<(), FunctionError> {
    Err(FunctionError::new("Direct8e error"))
}
