//! Simple query protocol state machine.

use std::sync::Arc;

use crate::buffer::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    msg_type, CommandComplete, DataRow, EmptyQueryResponse, ErrorResponse, RawMessage,
    ReadyForQuery, RowDescription,
};
use crate::protocol::frontend::write_query;
use crate::protocol::types::TransactionStatus;
use crate::registry::TypeRegistry;
use crate::row::{Column, Row, RowHandler};

use super::action::Action;
use super::util::parse_async_message;
use super::StateMachine;

/// Simple query state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Need to send the Query message
    Initial,
    /// Waiting for the first response of a statement
    WaitingResponse,
    /// Processing rows
    ProcessingRows,
    /// An error was received; discard frames until ReadyForQuery
    DrainUntilReady,
    /// Finished
    Finished,
}

/// Simple query protocol state machine.
///
/// Results arrive in text format and are decoded through the registry.
/// Multi-statement query strings produce one result-set cycle per statement.
pub struct SimpleQueryMachine<'a, H> {
    state: State,
    sql: &'a str,
    handler: &'a mut H,
    registry: Arc<TypeRegistry>,
    columns: Vec<Column>,
    transaction_status: TransactionStatus,
    pending_error: Option<Error>,
}

impl<'a, H: RowHandler> SimpleQueryMachine<'a, H> {
    /// Create a machine for one query string.
    pub fn new(sql: &'a str, handler: &'a mut H, registry: Arc<TypeRegistry>) -> Self {
        Self {
            state: State::Initial,
            sql,
            handler,
            registry,
            columns: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            pending_error: None,
        }
    }

    fn handle_response(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        let payload = &buffers.read_buffer;

        match buffers.type_byte {
            msg_type::ROW_DESCRIPTION => {
                let desc = RowDescription::parse(payload)?;
                self.columns = desc.fields().iter().map(Column::from_field).collect();
                self.handler.result_start(&self.columns)?;
                self.state = State::ProcessingRows;
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                self.handler.result_end(complete)?;
                // More statements may follow in a multi-statement query
                self.state = State::WaitingResponse;
                Ok(Action::ReadMessage)
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                EmptyQueryResponse::parse(payload)?;
                self.state = State::WaitingResponse;
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => self.finish(payload),
            msg_type::COPY_IN_RESPONSE | msg_type::COPY_OUT_RESPONSE => Err(Error::Protocol(
                "COPY is not supported on the simple query path".into(),
            )),
            _ => Err(Error::Protocol(format!(
                "unexpected message in query response: '{}'",
                buffers.type_byte as char
            ))),
        }
    }

    fn handle_rows(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        let payload = &buffers.read_buffer;

        match buffers.type_byte {
            msg_type::DATA_ROW => {
                let row = DataRow::parse(payload)?;
                let decoded = Row::decode(&self.columns, row, &self.registry)?;
                self.handler.row(&self.columns, decoded)?;
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                self.handler.result_end(complete)?;
                self.state = State::WaitingResponse;
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => self.finish(payload),
            _ => Err(Error::Protocol(format!(
                "unexpected message in row processing: '{}'",
                buffers.type_byte as char
            ))),
        }
    }

    fn finish(&mut self, payload: &[u8]) -> Result<Action> {
        let ready = ReadyForQuery::parse(payload)?;
        self.transaction_status = ready.transaction_status().unwrap_or_default();
        self.state = State::Finished;
        Ok(Action::Finished)
    }
}

impl<H: RowHandler> StateMachine for SimpleQueryMachine<'_, H> {
    fn step(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            buffers.write_buffer.clear();
            write_query(&mut buffers.write_buffer, self.sql);
            self.state = State::WaitingResponse;
            return Ok(Action::WriteAndReadMessage);
        }

        // Async messages are dispatched without altering state
        if RawMessage::is_async_type(buffers.type_byte) {
            let msg = parse_async_message(buffers.type_byte, &buffers.read_buffer)?;
            return Ok(Action::HandleAsyncMessage(msg));
        }

        // After an error, everything until ReadyForQuery is discarded
        if buffers.type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffers.read_buffer)?;
            self.pending_error = Some(error.into_error());
            self.state = State::DrainUntilReady;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            State::WaitingResponse => self.handle_response(buffers),
            State::ProcessingRows => self.handle_rows(buffers),
            State::DrainUntilReady => {
                if buffers.type_byte == msg_type::READY_FOR_QUERY {
                    self.finish(&buffers.read_buffer)
                } else {
                    Ok(Action::ReadMessage)
                }
            }
            _ => Err(Error::Protocol(format!(
                "unexpected state {:?}",
                self.state
            ))),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn take_error(&mut self) -> Option<Error> {
        self.pending_error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;
    use crate::row::CollectHandler;
    use crate::value::PgValue;

    fn feed(buffers: &mut BufferSet, type_byte: u8, payload: &[u8]) {
        buffers.type_byte = type_byte;
        buffers.read_buffer.clear();
        buffers.read_buffer.extend_from_slice(payload);
    }

    fn text_row_description(name: &str, type_oid: u32) -> Vec<u8> {
        let mut p = 1_u16.to_be_bytes().to_vec();
        p.extend_from_slice(name.as_bytes());
        p.push(0);
        p.extend_from_slice(&0_u32.to_be_bytes());
        p.extend_from_slice(&0_i16.to_be_bytes());
        p.extend_from_slice(&type_oid.to_be_bytes());
        p.extend_from_slice(&(-1_i16).to_be_bytes());
        p.extend_from_slice(&(-1_i32).to_be_bytes());
        p.extend_from_slice(&0_u16.to_be_bytes()); // text
        p
    }

    fn text_data_row(value: &[u8]) -> Vec<u8> {
        let mut p = 1_u16.to_be_bytes().to_vec();
        p.extend_from_slice(&(value.len() as i32).to_be_bytes());
        p.extend_from_slice(value);
        p
    }

    #[test]
    fn select_flow_decodes_rows() {
        let registry = Arc::new(TypeRegistry::new());
        let mut handler = CollectHandler::new();
        let mut buffers = BufferSet::new();
        let mut m = SimpleQueryMachine::new("SELECT 'foo'", &mut handler, registry);

        assert!(matches!(
            m.step(&mut buffers).unwrap(),
            Action::WriteAndReadMessage
        ));
        assert_eq!(buffers.write_buffer[0], b'Q');

        feed(
            &mut buffers,
            msg_type::ROW_DESCRIPTION,
            &text_row_description("?column?", oid::TEXT),
        );
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::ReadMessage));

        feed(&mut buffers, msg_type::DATA_ROW, &text_data_row(b"foo"));
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::ReadMessage));

        feed(&mut buffers, msg_type::COMMAND_COMPLETE, b"SELECT 1\0");
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::ReadMessage));

        feed(&mut buffers, msg_type::READY_FOR_QUERY, b"I");
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::Finished));
        assert_eq!(m.transaction_status(), TransactionStatus::Idle);
        assert!(m.take_error().is_none());

        assert_eq!(handler.rows().len(), 1);
        assert_eq!(
            handler.rows()[0].get(0),
            Some(&PgValue::Text("foo".into()))
        );
        assert_eq!(handler.command_tag(), Some("SELECT 1"));
    }

    #[test]
    fn error_drains_until_ready() {
        let registry = Arc::new(TypeRegistry::new());
        let mut handler = CollectHandler::new();
        let mut buffers = BufferSet::new();
        let mut m = SimpleQueryMachine::new("SELECT broken", &mut handler, registry);
        m.step(&mut buffers).unwrap();

        feed(
            &mut buffers,
            msg_type::ERROR_RESPONSE,
            b"SERROR\0C42703\0Mcolumn does not exist\0\0",
        );
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::ReadMessage));

        // Frames after the error are discarded with no handler effect
        feed(&mut buffers, msg_type::DATA_ROW, &text_data_row(b"zzz"));
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::ReadMessage));

        feed(&mut buffers, msg_type::READY_FOR_QUERY, b"E");
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::Finished));
        assert_eq!(m.transaction_status(), TransactionStatus::Failed);

        let err = m.take_error().unwrap();
        assert_eq!(err.sqlstate(), Some("42703"));
        assert!(handler.rows().is_empty());
    }

    #[test]
    fn multi_statement_cycles() {
        let registry = Arc::new(TypeRegistry::new());
        let mut handler = CollectHandler::new();
        let mut buffers = BufferSet::new();
        let mut m = SimpleQueryMachine::new("SELECT 1; UPDATE t SET x=1", &mut handler, registry);
        m.step(&mut buffers).unwrap();

        feed(
            &mut buffers,
            msg_type::ROW_DESCRIPTION,
            &text_row_description("a", oid::INT4),
        );
        m.step(&mut buffers).unwrap();
        feed(&mut buffers, msg_type::DATA_ROW, &text_data_row(b"1"));
        m.step(&mut buffers).unwrap();
        feed(&mut buffers, msg_type::COMMAND_COMPLETE, b"SELECT 1\0");
        m.step(&mut buffers).unwrap();

        // Second statement completes without a result set
        feed(&mut buffers, msg_type::COMMAND_COMPLETE, b"UPDATE 3\0");
        m.step(&mut buffers).unwrap();

        feed(&mut buffers, msg_type::READY_FOR_QUERY, b"I");
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::Finished));
        assert_eq!(handler.command_tag(), Some("UPDATE 3"));
        assert_eq!(handler.rows().len(), 1);
    }
}
