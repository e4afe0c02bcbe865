use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flexlink_frame::codec::CMD_WRITE;
use flexlink_frame::status::slave_fail;
use flexlink_frame::{FrameReader, RawFrame};
use flexlink_transport::TransportError;
use tracing::{debug, warn};

use crate::config::DispatchMode;
use crate::error::{EngineError, Result};
use crate::link::{Link, ReplySink};

const READER_THREAD: &str = "flexlink-reader";
const DISPATCH_THREAD: &str = "flexlink-dispatch";

enum Route {
    Inline,
    Queued(SyncSender<RawFrame>),
}

/// Start the reader thread, plus the dispatch thread in queued mode.
pub(crate) fn spawn(
    link: Arc<Link>,
    mode: DispatchMode,
    read_chunk: usize,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(2);

    let route = match mode {
        DispatchMode::Inline => Route::Inline,
        DispatchMode::Queued { depth } => {
            let (tx, rx) = mpsc::sync_channel(depth);
            let link = Arc::clone(&link);
            handles.push(
                thread::Builder::new()
                    .name(DISPATCH_THREAD.to_string())
                    .spawn(move || dispatch_loop(&link, rx))
                    .map_err(TransportError::Io)?,
            );
            Route::Queued(tx)
        }
    };

    handles.push(
        thread::Builder::new()
            .name(READER_THREAD.to_string())
            .spawn(move || {
                let mut reader = FrameReader::new(read_chunk);
                read_loop(&link, &route, &mut reader);
            })
            .map_err(TransportError::Io)?,
    );
    Ok(handles)
}

/// Drain the transport until shutdown or failure.
///
/// Master frames go to the response ring in arrival order. Slave frames go
/// to the handler, inline or through the dispatch queue.
fn read_loop(link: &Link, route: &Route, reader: &mut FrameReader) {
    debug!("reader started");
    while !link.is_shut_down() {
        let frame = match reader.poll_frame(link.transport()) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                thread::yield_now();
                continue;
            }
            Err(err) => {
                if !link.is_shut_down() {
                    link.fail(&EngineError::from(err));
                }
                break;
            }
        };

        if frame.is_master() {
            link.count_master_frame();
            let pushed = link
                .ring
                .write_all(&[frame.command])
                .and_then(|()| link.ring.write_all(&frame.payload));
            if pushed.is_err() {
                // Ring closed: the link failed or is shutting down.
                break;
            }
            continue;
        }

        link.count_slave_frame();
        match route {
            Route::Inline => {
                if let Err(err) = handle_slave(link, &frame) {
                    link.fail(&err);
                    break;
                }
            }
            Route::Queued(tx) => {
                if tx.send(frame).is_err() {
                    break;
                }
            }
        }
    }
    debug!(buffered = reader.buffered(), "reader stopped");
}

fn dispatch_loop(link: &Link, rx: Receiver<RawFrame>) {
    for frame in rx {
        if let Err(err) = handle_slave(link, &frame) {
            link.fail(&err);
            break;
        }
    }
    debug!("dispatcher stopped");
}

/// Route one slave frame. Returns an error only when the link can no longer
/// be trusted.
fn handle_slave(link: &Link, frame: &RawFrame) -> Result<()> {
    let handler = link.handler().filter(|_| link.slave_gate());
    let Some(handler) = handler else {
        warn!(
            cmd = format_args!("{:#04x}", frame.command),
            enabled = link.slave_gate(),
            "slave frame while dispatch is unavailable, replying FAIL"
        );
        return link.reply(&[slave_fail(frame.command & CMD_WRITE != 0)]);
    };

    match handler.handle(frame, link) {
        Ok(()) => Ok(()),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!(%err, "slave handler failed");
            Ok(())
        }
    }
}
