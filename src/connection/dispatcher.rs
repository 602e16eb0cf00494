//! The background read dispatcher.
//!
//! A single long-running task owns the read half of the transport. It is
//! the only reader: asynchronous traffic (`ParameterStatus`,
//! `NoticeResponse`, `NotificationResponse`) is routed out of band, and
//! every other message is handed to the active query through the
//! single-slot channel. Handing off awaits consumption, so a slow consumer
//! pauses the dispatcher instead of letting messages pile up — that is the
//! whole backpressure story.
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, ReadHalf};

use crate::{
    Error, Result,
    config::NoticeHandler,
    postgres::{BackendMessage, BackendProtocol},
};

use super::{BoxStream, Done, Shared};

const READ_BUF_CAPACITY: usize = 4096;

pub(super) async fn run(
    shared: Arc<Shared>,
    mut io: ReadHalf<BoxStream>,
    notice: Option<NoticeHandler>,
) {
    let mut buf = BytesMut::with_capacity(READ_BUF_CAPACITY);

    match read_loop(&shared, &mut io, &mut buf, notice.as_ref()).await {
        Ok(()) => {
            // server EOF: graceful only when close() or a FATAL already
            // resolved the latch; otherwise the server walked away
            shared.done.set(Done::Error(Arc::new(
                std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into(),
            )));
        }
        Err(err) => {
            shared.done.set(Done::Error(Arc::new(err)));
        }
    }

    shared.finalize();
    let mut writer = shared.writer.lock().await;
    let _ = writer.shutdown().await;
}

async fn read_loop(
    shared: &Shared,
    io: &mut ReadHalf<BoxStream>,
    buf: &mut BytesMut,
    notice: Option<&NoticeHandler>,
) -> Result<()> {
    loop {
        let Some((msgtype, body)) = read_frame(io, buf).await? else {
            return Ok(());
        };

        let msg = BackendMessage::decode(msgtype, body)?;
        if shared.debug {
            tracing::debug!("(B){msg:?}");
        } else {
            tracing::trace!("(B){msg:?}");
        }

        match msg {
            BackendMessage::ParameterStatus(status) => {
                shared
                    .params
                    .write()
                    .insert(status.name.to_string(), status.value.to_string());
            }
            BackendMessage::NoticeResponse(warn) => match notice {
                // the handler runs on the dispatcher task, pacing the
                // message flow like every other consumer
                Some(handler) => handler(warn.0),
                None => tracing::warn!("{}", warn.0),
            },
            BackendMessage::NotificationResponse(n) => {
                super::listen::dispatch(shared, n).await;
            }
            BackendMessage::ErrorResponse(err) if err.0.is_fatal() => {
                // the connection is over: resolve done first, then leave
                // the message for a pending query without parking on it,
                // and keep reading toward the server's EOF
                shared.done.set(Done::Error(Arc::new(err.0.clone().into())));
                shared.slot.deliver(BackendMessage::ErrorResponse(err));
            }
            msg => {
                if shared.slot.send(msg).await.is_err() {
                    // finalized under us; nothing left to deliver to
                    return Ok(());
                }
            }
        }
    }
}

/// Read one `[type:u8][length:i32][body…]` frame.
///
/// Returns `None` on a clean EOF at a frame boundary; EOF inside a frame is
/// an error.
async fn read_frame(
    io: &mut ReadHalf<BoxStream>,
    buf: &mut BytesMut,
) -> Result<Option<(u8, bytes::Bytes)>> {
    loop {
        if buf.len() >= 5 {
            let mut header = &buf[..5];
            let msgtype = header.get_u8();
            let frame_len = header.get_i32();
            if frame_len < 4 {
                return Err(crate::postgres::ProtocolError::truncated(msgtype).into());
            }
            let body_len = frame_len as usize - 4;

            if buf.len() >= 5 + body_len {
                buf.advance(5);
                let body = buf.split_to(body_len).freeze();
                return Ok(Some((msgtype, body)));
            }
            buf.reserve(5 + body_len - buf.len());
        } else {
            buf.reserve(READ_BUF_CAPACITY);
        }

        if io.read_buf(buf).await? == 0 {
            return match buf.is_empty() {
                true => Ok(None),
                false => Err(Error::from(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                ))),
            };
        }
    }
}
