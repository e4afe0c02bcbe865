//! Pipelined master transfers.
//!
//! Requests are packed into two alternating batches, each no larger than
//! the chunk bound. When the current batch is full it is transmitted and
//! the other one becomes current; if that one is still in flight, its
//! responses are drained first. Two batches stay in flight at a time, so
//! round-trip latency hides behind filling the next batch.
//!
//! Responses carry no transaction id. They are matched to requests purely
//! by arrival order, which is why a whole call runs under the API lock.

use std::time::Duration;

use bytes::BytesMut;
use flexlink_frame::codec::{encode_read_request, encode_write_request, get_value};
use flexlink_frame::status::is_fail;
use flexlink_frame::{
    response_len, FrameError, Op, PendingBatch, PingPong, RawFrame, Width, MAX_REQUEST_FRAME,
};
use tracing::{debug, trace};

use crate::error::{EngineError, Result};
use crate::link::Link;

/// Take the next master response off the ring.
pub(crate) fn next_response(link: &Link, timeout: Option<Duration>) -> Result<RawFrame> {
    link.ring.read_frame(timeout).map_err(|err| match err {
        FrameError::ChannelClosed => EngineError::Closed(
            link.failure()
                .unwrap_or_else(|| "response channel closed".to_string()),
        ),
        other => EngineError::from(other),
    })
}

/// One pipelined call: `count` requests of the same op and width starting
/// at `address`.
pub(crate) struct Pipeline<'a> {
    link: &'a Link,
    batches: &'a mut PingPong,
    timeout: Option<Duration>,
    op: Op,
    width: Width,
    address: u32,
    drained: usize,
    fault: Option<usize>,
}

impl<'a> Pipeline<'a> {
    pub(crate) fn new(
        link: &'a Link,
        batches: &'a mut PingPong,
        timeout: Option<Duration>,
        op: Op,
        width: Width,
        address: u32,
    ) -> Self {
        Self {
            link,
            batches,
            timeout,
            op,
            width,
            address,
            drained: 0,
            fault: None,
        }
    }

    /// Run the transfer.
    ///
    /// `value_at(i)` supplies write data; `deliver(i, value)` receives read
    /// data. On a bus fault no further requests are issued, every response
    /// already in flight is drained, and the first faulting element is
    /// reported. Fatal errors invalidate the link.
    pub(crate) fn run(
        mut self,
        count: usize,
        value_at: impl Fn(usize) -> u32,
        mut deliver: impl FnMut(usize, u32),
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.link.check()?;
        self.batches.reset();

        debug!(
            op = ?self.op,
            width = %self.width.tag(),
            addr = format_args!("{:#010x}", self.address),
            count,
            "transfer"
        );

        if let Err(err) = self.pump(count, &value_at, &mut deliver) {
            if err.is_fatal() {
                self.link.fail(&err);
            }
            self.batches.reset();
            return Err(err);
        }

        match self.fault {
            None => Ok(()),
            Some(index) => Err(EngineError::BusFault {
                index,
                address: self
                    .address
                    .wrapping_add((index * self.width.bytes()) as u32),
            }),
        }
    }

    fn pump(
        &mut self,
        count: usize,
        value_at: &impl Fn(usize) -> u32,
        deliver: &mut impl FnMut(usize, u32),
    ) -> Result<()> {
        let response = response_len(self.op, self.width);
        let mut frame = BytesMut::with_capacity(MAX_REQUEST_FRAME);

        for index in 0..count {
            if self.fault.is_some() {
                break;
            }
            frame.clear();
            let address = (index == 0).then_some(self.address);
            match self.op {
                Op::Read => encode_read_request(self.width, address, &mut frame)?,
                Op::Write => {
                    encode_write_request(self.width, address, value_at(index), &mut frame)?
                }
            }

            if !self.batches.current().fits(frame.len()) {
                self.flush_current()?;
                self.batches.swap();
                let older = self.batches.current_mut();
                Self::drain(
                    self.link,
                    older,
                    self.timeout,
                    self.op,
                    self.width,
                    &mut self.drained,
                    &mut self.fault,
                    deliver,
                )?;
            }
            self.batches.current_mut().append(&frame, response)?;
        }

        if self.fault.is_none() {
            self.flush_current()?;
        } else {
            // Requests never sent have no responses coming.
            let current = self.batches.current_mut();
            if !current.is_in_flight() {
                current.reset();
            }
        }

        // The other batch went out before the current one.
        for older_first in [true, false] {
            let batch = if older_first {
                self.batches.other_mut()
            } else {
                self.batches.current_mut()
            };
            Self::drain(
                self.link,
                batch,
                self.timeout,
                self.op,
                self.width,
                &mut self.drained,
                &mut self.fault,
                deliver,
            )?;
        }
        Ok(())
    }

    fn flush_current(&mut self) -> Result<()> {
        let batch = self.batches.current_mut();
        if batch.is_empty() || batch.is_in_flight() {
            return Ok(());
        }
        trace!(
            requests = batch.requests(),
            bytes = batch.as_bytes().len(),
            "flush batch"
        );
        self.link.send(batch.as_bytes())?;
        batch.mark_sent();
        Ok(())
    }

    /// Consume the responses of an in-flight batch in FIFO order.
    #[allow(clippy::too_many_arguments)]
    fn drain(
        link: &Link,
        batch: &mut PendingBatch,
        timeout: Option<Duration>,
        op: Op,
        width: Width,
        drained: &mut usize,
        fault: &mut Option<usize>,
        deliver: &mut impl FnMut(usize, u32),
    ) -> Result<()> {
        if !batch.is_in_flight() {
            return Ok(());
        }
        for _ in 0..batch.requests() {
            let index = *drained;
            let response = next_response(link, timeout)?;
            *drained += 1;

            if is_fail(response.command) {
                if fault.is_none() {
                    debug!(index, status = response.command, "bus fault");
                    *fault = Some(index);
                }
                continue;
            }

            match op {
                Op::Read => {
                    if response.payload.len() != width.bytes() {
                        return Err(EngineError::Protocol(format!(
                            "read response {:#04x} carries {} bytes, expected {}",
                            response.command,
                            response.payload.len(),
                            width.bytes()
                        )));
                    }
                    if fault.is_none() {
                        deliver(index, get_value(width, &response.payload)?);
                    }
                }
                Op::Write => {
                    if !response.payload.is_empty() {
                        return Err(EngineError::Protocol(format!(
                            "write response {:#04x} carries {} unexpected bytes",
                            response.command,
                            response.payload.len()
                        )));
                    }
                }
            }
        }
        batch.reset();
        Ok(())
    }
}
