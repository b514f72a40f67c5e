//! Shared helpers for the query state machines.

use crate::error::{Error, Result};
use crate::protocol::backend::{msg_type, NoticeResponse, NotificationResponse, ParameterStatus};

use super::action::AsyncMessage;

/// Parse one of the asynchronous message types into an [`AsyncMessage`].
pub(crate) fn parse_async_message(type_byte: u8, payload: &[u8]) -> Result<AsyncMessage> {
    match type_byte {
        msg_type::NOTICE_RESPONSE => {
            let notice = NoticeResponse::parse(payload)?;
            Ok(AsyncMessage::Notice(notice.0))
        }
        msg_type::PARAMETER_STATUS => {
            let param = ParameterStatus::parse(payload)?;
            Ok(AsyncMessage::ParameterChanged {
                name: param.name.to_string(),
                value: param.value.to_string(),
            })
        }
        msg_type::NOTIFICATION_RESPONSE => {
            let notification = NotificationResponse::parse(payload)?;
            Ok(AsyncMessage::Notification {
                pid: notification.pid,
                channel: notification.channel.to_string(),
                payload: notification.payload.to_string(),
            })
        }
        _ => Err(Error::Protocol(format!(
            "unknown async message type: '{}'",
            type_byte as char
        ))),
    }
}
