//! Worker thread body — one oracle per thread, strict FIFO requests.
//!
//! Each worker builds its own oracle from the pool's factory and loads
//! its own copy of the font, so workers share nothing but the message
//! channels. Oracle calls are wrapped in `catch_unwind` so a panicking
//! generator produces a `Failed` reply instead of a silently dead
//! thread; the dispatcher decides what to do with the worker.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use glyphfield_atlas::SdfBitmap;

use crate::{OracleFactory, SdfKind};

pub(crate) enum WorkerRequest {
    Generate {
        seq: usize,
        code_point: u32,
        font_size: u32,
        pixel_range: f32,
        kind: SdfKind,
    },
    Dispose,
}

pub(crate) enum WorkerReply {
    Ready,
    InitFailed { reason: String },
    Result { seq: usize, bitmap: Option<SdfBitmap> },
    Failed { seq: usize, reason: String },
    Disposed,
}

pub(crate) fn run(
    index: usize,
    factory: OracleFactory,
    font: Arc<Vec<u8>>,
    requests: Receiver<WorkerRequest>,
    replies: Sender<(usize, WorkerReply)>,
) {
    let mut oracle = match catch_unwind(AssertUnwindSafe(|| {
        let mut oracle = factory();
        oracle.load_font(&font);
        oracle
    })) {
        Ok(oracle) => {
            let _ = replies.send((index, WorkerReply::Ready));
            oracle
        }
        Err(panic) => {
            let _ = replies.send((
                index,
                WorkerReply::InitFailed {
                    reason: panic_message(&*panic),
                },
            ));
            return;
        }
    };

    while let Ok(request) = requests.recv() {
        match request {
            WorkerRequest::Generate {
                seq,
                code_point,
                font_size,
                pixel_range,
                kind,
            } => {
                let outcome = catch_unwind(AssertUnwindSafe(|| match kind {
                    SdfKind::Msdf => oracle.generate_msdf(code_point, font_size, pixel_range),
                    SdfKind::Mtsdf => oracle.generate_mtsdf(code_point, font_size, pixel_range),
                }));
                let reply = match outcome {
                    Ok(bitmap) => WorkerReply::Result { seq, bitmap },
                    Err(panic) => WorkerReply::Failed {
                        seq,
                        reason: panic_message(&*panic),
                    },
                };
                if replies.send((index, reply)).is_err() {
                    break;
                }
            }
            WorkerRequest::Dispose => {
                let _ = replies.send((index, WorkerReply::Disposed));
                break;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
