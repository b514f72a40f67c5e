//! Extended query protocol state machines.
//!
//! [`PrepareMachine`] drives Parse + Describe(statement) + Sync and yields
//! the parameter OIDs and row description. [`ExecuteMachine`] drives the
//! Bind/Execute/Close flows against a prepared statement. Result formats
//! are fixed at Bind time from the cached row description, so no Describe
//! round trip happens on the execute path.

use std::sync::Arc;

use crate::buffer::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    msg_type, BindComplete, CloseComplete, CommandComplete, DataRow, EmptyQueryResponse,
    ErrorResponse, NoData, ParameterDescription, ParseComplete, PortalSuspended, RawMessage,
    ReadyForQuery, RowDescription,
};
use crate::protocol::frontend::{
    write_bind, write_close_portal, write_close_statement, write_describe_statement,
    write_execute, write_parse, write_sync,
};
use crate::protocol::types::{FormatCode, Oid, TransactionStatus};
use crate::registry::{EncodedParams, TypeRegistry};
use crate::row::{Column, Row, RowHandler};

use super::action::Action;
use super::util::parse_async_message;
use super::StateMachine;

/// Prepare-flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrepareState {
    Initial,
    WaitingParse,
    WaitingParamDesc,
    WaitingRowDesc,
    WaitingReady,
    DrainUntilReady,
    Finished,
}

/// State machine for preparing a named statement:
/// Parse + Describe(statement) + Sync.
pub struct PrepareMachine<'a> {
    state: PrepareState,
    name: &'a str,
    sql: &'a str,
    param_oid_hints: &'a [Oid],
    param_oids: Vec<Oid>,
    columns: Option<Vec<Column>>,
    transaction_status: TransactionStatus,
    pending_error: Option<Error>,
}

impl<'a> PrepareMachine<'a> {
    /// Prepare `sql` as statement `name`.
    ///
    /// `param_oid_hints` pins parameter types in the Parse message; OID 0
    /// lets the server infer.
    pub fn new(name: &'a str, sql: &'a str, param_oid_hints: &'a [Oid]) -> Self {
        Self {
            state: PrepareState::Initial,
            name,
            sql,
            param_oid_hints,
            param_oids: Vec::new(),
            columns: None,
            transaction_status: TransactionStatus::Idle,
            pending_error: None,
        }
    }

    /// The results of the prepare flow: parameter OIDs and row description.
    pub fn take_results(&mut self) -> (Vec<Oid>, Option<Vec<Column>>) {
        (std::mem::take(&mut self.param_oids), self.columns.take())
    }

    fn finish(&mut self, payload: &[u8]) -> Result<Action> {
        let ready = ReadyForQuery::parse(payload)?;
        self.transaction_status = ready.transaction_status().unwrap_or_default();
        self.state = PrepareState::Finished;
        Ok(Action::Finished)
    }
}

impl StateMachine for PrepareMachine<'_> {
    fn step(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        if self.state == PrepareState::Initial {
            buffers.write_buffer.clear();
            write_parse(
                &mut buffers.write_buffer,
                self.name,
                self.sql,
                self.param_oid_hints,
            );
            write_describe_statement(&mut buffers.write_buffer, self.name);
            write_sync(&mut buffers.write_buffer);
            self.state = PrepareState::WaitingParse;
            return Ok(Action::WriteAndReadMessage);
        }

        if RawMessage::is_async_type(buffers.type_byte) {
            let msg = parse_async_message(buffers.type_byte, &buffers.read_buffer)?;
            return Ok(Action::HandleAsyncMessage(msg));
        }

        if buffers.type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffers.read_buffer)?;
            self.pending_error = Some(error.into_error());
            self.state = PrepareState::DrainUntilReady;
            return Ok(Action::ReadMessage);
        }

        let payload = &buffers.read_buffer;
        match self.state {
            PrepareState::WaitingParse => {
                if buffers.type_byte != msg_type::PARSE_COMPLETE {
                    return Err(Error::Protocol(format!(
                        "expected ParseComplete, got '{}'",
                        buffers.type_byte as char
                    )));
                }
                ParseComplete::parse(payload)?;
                self.state = PrepareState::WaitingParamDesc;
                Ok(Action::ReadMessage)
            }
            PrepareState::WaitingParamDesc => {
                if buffers.type_byte != msg_type::PARAMETER_DESCRIPTION {
                    return Err(Error::Protocol(format!(
                        "expected ParameterDescription, got '{}'",
                        buffers.type_byte as char
                    )));
                }
                self.param_oids = ParameterDescription::parse(payload)?.into_oids();
                self.state = PrepareState::WaitingRowDesc;
                Ok(Action::ReadMessage)
            }
            PrepareState::WaitingRowDesc => match buffers.type_byte {
                msg_type::ROW_DESCRIPTION => {
                    let desc = RowDescription::parse(payload)?;
                    self.columns = Some(desc.fields().iter().map(Column::from_field).collect());
                    self.state = PrepareState::WaitingReady;
                    Ok(Action::ReadMessage)
                }
                msg_type::NO_DATA => {
                    NoData::parse(payload)?;
                    self.columns = None;
                    self.state = PrepareState::WaitingReady;
                    Ok(Action::ReadMessage)
                }
                _ => Err(Error::Protocol(format!(
                    "expected RowDescription or NoData, got '{}'",
                    buffers.type_byte as char
                ))),
            },
            PrepareState::WaitingReady => match buffers.type_byte {
                msg_type::READY_FOR_QUERY => self.finish(payload),
                _ => Err(Error::Protocol(format!(
                    "expected ReadyForQuery, got '{}'",
                    buffers.type_byte as char
                ))),
            },
            PrepareState::DrainUntilReady => {
                if buffers.type_byte == msg_type::READY_FOR_QUERY {
                    self.finish(payload)
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

/// What the execute machine sends before Sync.
enum Plan<'a> {
    /// Bind + Execute: the one-shot execution path
    BindExecute {
        statement: &'a str,
        portal: &'a str,
        params: EncodedParams,
        max_rows: u32,
    },
    /// Bind only: create a portal to be executed later
    BindPortal {
        statement: &'a str,
        portal: &'a str,
        params: EncodedParams,
    },
    /// Execute an existing portal (the "continue portal" op)
    ExecutePortal { portal: &'a str, max_rows: u32 },
    /// Close a statement
    CloseStatement { name: &'a str },
    /// Close a portal
    ClosePortal { name: &'a str },
}

/// Execute-flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecuteState {
    Initial,
    WaitingBind,
    ProcessingRows,
    WaitingReady,
    DrainUntilReady,
    Finished,
}

/// State machine for the Bind/Execute/Close flows.
pub struct ExecuteMachine<'a, H> {
    state: ExecuteState,
    plan: Plan<'a>,
    handler: &'a mut H,
    registry: Arc<TypeRegistry>,
    /// Columns with the formats requested at Bind time
    columns: Arc<[Column]>,
    transaction_status: TransactionStatus,
    pending_error: Option<Error>,
    suspended: bool,
}

impl<'a, H: RowHandler> ExecuteMachine<'a, H> {
    fn with_plan(
        plan: Plan<'a>,
        handler: &'a mut H,
        registry: Arc<TypeRegistry>,
        columns: Arc<[Column]>,
    ) -> Self {
        Self {
            state: ExecuteState::Initial,
            plan,
            handler,
            registry,
            columns,
            transaction_status: TransactionStatus::Idle,
            pending_error: None,
            suspended: false,
        }
    }

    /// One-shot execution: Bind + Execute + Sync on the unnamed portal.
    pub fn bind_execute(
        handler: &'a mut H,
        registry: Arc<TypeRegistry>,
        statement: &'a str,
        params: EncodedParams,
        columns: Arc<[Column]>,
        max_rows: u32,
    ) -> Self {
        Self::with_plan(
            Plan::BindExecute {
                statement,
                portal: "",
                params,
                max_rows,
            },
            handler,
            registry,
            columns,
        )
    }

    /// Create a named portal: Bind + Sync.
    pub fn bind_portal(
        handler: &'a mut H,
        registry: Arc<TypeRegistry>,
        statement: &'a str,
        portal: &'a str,
        params: EncodedParams,
        columns: Arc<[Column]>,
    ) -> Self {
        Self::with_plan(
            Plan::BindPortal {
                statement,
                portal,
                params,
            },
            handler,
            registry,
            columns,
        )
    }

    /// Resume a suspended portal: Execute + Sync.
    pub fn execute_portal(
        handler: &'a mut H,
        registry: Arc<TypeRegistry>,
        portal: &'a str,
        max_rows: u32,
        columns: Arc<[Column]>,
    ) -> Self {
        Self::with_plan(
            Plan::ExecutePortal { portal, max_rows },
            handler,
            registry,
            columns,
        )
    }

    /// Close a prepared statement: Close(S) + Sync.
    pub fn close_statement(handler: &'a mut H, registry: Arc<TypeRegistry>, name: &'a str) -> Self {
        Self::with_plan(
            Plan::CloseStatement { name },
            handler,
            registry,
            Vec::new().into(),
        )
    }

    /// Close a portal: Close(P) + Sync.
    pub fn close_portal(handler: &'a mut H, registry: Arc<TypeRegistry>, name: &'a str) -> Self {
        Self::with_plan(
            Plan::ClosePortal { name },
            handler,
            registry,
            Vec::new().into(),
        )
    }

    /// True if Execute stopped at the row limit and the portal remains open.
    pub fn suspended(&self) -> bool {
        self.suspended
    }

    fn write_plan(&mut self, buffers: &mut BufferSet) -> ExecuteState {
        buffers.write_buffer.clear();
        let buf = &mut buffers.write_buffer;

        match &self.plan {
            Plan::BindExecute {
                statement,
                portal,
                params,
                max_rows,
            } => {
                let result_formats: Vec<FormatCode> =
                    self.columns.iter().map(|c| c.format).collect();
                write_bind(
                    buf,
                    portal,
                    statement,
                    &params.formats,
                    params.count,
                    &params.data,
                    &result_formats,
                );
                write_execute(buf, portal, *max_rows);
                write_sync(buf);
                ExecuteState::WaitingBind
            }
            Plan::BindPortal {
                statement,
                portal,
                params,
            } => {
                let result_formats: Vec<FormatCode> =
                    self.columns.iter().map(|c| c.format).collect();
                write_bind(
                    buf,
                    portal,
                    statement,
                    &params.formats,
                    params.count,
                    &params.data,
                    &result_formats,
                );
                write_sync(buf);
                ExecuteState::WaitingBind
            }
            Plan::ExecutePortal { portal, max_rows } => {
                write_execute(buf, portal, *max_rows);
                write_sync(buf);
                ExecuteState::ProcessingRows
            }
            Plan::CloseStatement { name } => {
                write_close_statement(buf, name);
                write_sync(buf);
                ExecuteState::WaitingReady
            }
            Plan::ClosePortal { name } => {
                write_close_portal(buf, name);
                write_sync(buf);
                ExecuteState::WaitingReady
            }
        }
    }

    fn handle_bind(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        if buffers.type_byte != msg_type::BIND_COMPLETE {
            return Err(Error::Protocol(format!(
                "expected BindComplete, got '{}'",
                buffers.type_byte as char
            )));
        }
        BindComplete::parse(&buffers.read_buffer)?;

        match self.plan {
            Plan::BindPortal { .. } => {
                self.state = ExecuteState::WaitingReady;
            }
            _ => {
                if !self.columns.is_empty() {
                    self.handler.result_start(&self.columns)?;
                }
                self.state = ExecuteState::ProcessingRows;
            }
        }
        Ok(Action::ReadMessage)
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
                self.state = ExecuteState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::PORTAL_SUSPENDED => {
                PortalSuspended::parse(payload)?;
                self.suspended = true;
                self.state = ExecuteState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                EmptyQueryResponse::parse(payload)?;
                self.state = ExecuteState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => self.finish(payload),
            _ => Err(Error::Protocol(format!(
                "unexpected message during execute: '{}'",
                buffers.type_byte as char
            ))),
        }
    }

    fn finish(&mut self, payload: &[u8]) -> Result<Action> {
        let ready = ReadyForQuery::parse(payload)?;
        self.transaction_status = ready.transaction_status().unwrap_or_default();
        self.state = ExecuteState::Finished;
        Ok(Action::Finished)
    }
}

impl<H: RowHandler> StateMachine for ExecuteMachine<'_, H> {
    fn step(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        if self.state == ExecuteState::Initial {
            self.state = self.write_plan(buffers);
            return Ok(Action::WriteAndReadMessage);
        }

        if RawMessage::is_async_type(buffers.type_byte) {
            let msg = parse_async_message(buffers.type_byte, &buffers.read_buffer)?;
            return Ok(Action::HandleAsyncMessage(msg));
        }

        if buffers.type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffers.read_buffer)?;
            self.pending_error = Some(error.into_error());
            self.state = ExecuteState::DrainUntilReady;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            ExecuteState::WaitingBind => self.handle_bind(buffers),
            ExecuteState::ProcessingRows => self.handle_rows(buffers),
            ExecuteState::WaitingReady => match buffers.type_byte {
                msg_type::READY_FOR_QUERY => self.finish(&buffers.read_buffer),
                msg_type::CLOSE_COMPLETE => {
                    CloseComplete::parse(&buffers.read_buffer)?;
                    Ok(Action::ReadMessage)
                }
                _ => Err(Error::Protocol(format!(
                    "expected ReadyForQuery, got '{}'",
                    buffers.type_byte as char
                ))),
            },
            ExecuteState::DrainUntilReady => {
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

    fn int4_columns() -> Arc<[Column]> {
        vec![Column {
            name: "n".into(),
            table_oid: 0,
            column_id: 0,
            type_oid: oid::INT4,
            type_size: 4,
            type_modifier: -1,
            format: FormatCode::Binary,
        }]
        .into()
    }

    fn binary_int4_row(v: i32) -> Vec<u8> {
        let mut p = 1_u16.to_be_bytes().to_vec();
        p.extend_from_slice(&4_i32.to_be_bytes());
        p.extend_from_slice(&v.to_be_bytes());
        p
    }

    fn row_description_payload() -> Vec<u8> {
        let mut p = 1_u16.to_be_bytes().to_vec();
        p.extend_from_slice(b"n\0");
        p.extend_from_slice(&0_u32.to_be_bytes());
        p.extend_from_slice(&0_i16.to_be_bytes());
        p.extend_from_slice(&oid::INT4.to_be_bytes());
        p.extend_from_slice(&4_i16.to_be_bytes());
        p.extend_from_slice(&(-1_i32).to_be_bytes());
        p.extend_from_slice(&0_u16.to_be_bytes());
        p
    }

    #[test]
    fn prepare_flow_collects_metadata() {
        let mut buffers = BufferSet::new();
        let mut m = PrepareMachine::new("s1", "SELECT $1::int4", &[]);

        assert!(matches!(
            m.step(&mut buffers).unwrap(),
            Action::WriteAndReadMessage
        ));
        // Parse, Describe, Sync in one batch
        assert_eq!(buffers.write_buffer[0], b'P');
        assert!(buffers.write_buffer.ends_with(&[b'S', 0, 0, 0, 4]));

        feed(&mut buffers, msg_type::PARSE_COMPLETE, b"");
        m.step(&mut buffers).unwrap();

        let mut param_desc = 1_u16.to_be_bytes().to_vec();
        param_desc.extend_from_slice(&oid::INT4.to_be_bytes());
        feed(&mut buffers, msg_type::PARAMETER_DESCRIPTION, &param_desc);
        m.step(&mut buffers).unwrap();

        feed(
            &mut buffers,
            msg_type::ROW_DESCRIPTION,
            &row_description_payload(),
        );
        m.step(&mut buffers).unwrap();

        feed(&mut buffers, msg_type::READY_FOR_QUERY, b"I");
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::Finished));

        let (param_oids, columns) = m.take_results();
        assert_eq!(param_oids, vec![oid::INT4]);
        assert_eq!(columns.unwrap()[0].type_oid, oid::INT4);
    }

    #[test]
    fn prepare_no_data_statement() {
        let mut buffers = BufferSet::new();
        let mut m = PrepareMachine::new("s2", "DELETE FROM t", &[]);
        m.step(&mut buffers).unwrap();

        feed(&mut buffers, msg_type::PARSE_COMPLETE, b"");
        m.step(&mut buffers).unwrap();
        feed(&mut buffers, msg_type::PARAMETER_DESCRIPTION, &0_u16.to_be_bytes());
        m.step(&mut buffers).unwrap();
        feed(&mut buffers, msg_type::NO_DATA, b"");
        m.step(&mut buffers).unwrap();
        feed(&mut buffers, msg_type::READY_FOR_QUERY, b"I");
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::Finished));

        let (param_oids, columns) = m.take_results();
        assert!(param_oids.is_empty());
        assert!(columns.is_none());
    }

    #[test]
    fn execute_flow_decodes_binary_rows() {
        let registry = Arc::new(TypeRegistry::new());
        let mut handler = CollectHandler::new();
        let mut buffers = BufferSet::new();
        let params = registry.encode_params(&[]).unwrap();
        let mut m = ExecuteMachine::bind_execute(
            &mut handler,
            registry.clone(),
            "s1",
            params,
            int4_columns(),
            0,
        );

        assert!(matches!(
            m.step(&mut buffers).unwrap(),
            Action::WriteAndReadMessage
        ));
        assert_eq!(buffers.write_buffer[0], b'B');

        feed(&mut buffers, msg_type::BIND_COMPLETE, b"");
        m.step(&mut buffers).unwrap();

        feed(&mut buffers, msg_type::DATA_ROW, &binary_int4_row(42));
        m.step(&mut buffers).unwrap();

        feed(&mut buffers, msg_type::COMMAND_COMPLETE, b"SELECT 1\0");
        m.step(&mut buffers).unwrap();

        feed(&mut buffers, msg_type::READY_FOR_QUERY, b"I");
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::Finished));
        assert!(!m.suspended());

        assert_eq!(handler.rows().len(), 1);
        assert_eq!(handler.rows()[0].get(0), Some(&PgValue::Int4(42)));
    }

    #[test]
    fn portal_suspension_is_reported() {
        let registry = Arc::new(TypeRegistry::new());
        let mut handler = CollectHandler::new();
        let mut buffers = BufferSet::new();
        let mut m = ExecuteMachine::execute_portal(
            &mut handler,
            registry.clone(),
            "p1",
            1,
            int4_columns(),
        );

        m.step(&mut buffers).unwrap();
        assert_eq!(buffers.write_buffer[0], b'E');

        feed(&mut buffers, msg_type::DATA_ROW, &binary_int4_row(1));
        m.step(&mut buffers).unwrap();
        feed(&mut buffers, msg_type::PORTAL_SUSPENDED, b"");
        m.step(&mut buffers).unwrap();
        feed(&mut buffers, msg_type::READY_FOR_QUERY, b"T");
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::Finished));

        assert!(m.suspended());
        assert_eq!(m.transaction_status(), TransactionStatus::InTransaction);
    }

    #[test]
    fn error_during_execute_drains_to_ready() {
        let registry = Arc::new(TypeRegistry::new());
        let mut handler = CollectHandler::new();
        let mut buffers = BufferSet::new();
        let params = registry.encode_params(&[]).unwrap();
        let mut m = ExecuteMachine::bind_execute(
            &mut handler,
            registry.clone(),
            "s1",
            params,
            int4_columns(),
            0,
        );
        m.step(&mut buffers).unwrap();

        feed(
            &mut buffers,
            msg_type::ERROR_RESPONSE,
            b"SERROR\0C23505\0Mduplicate key\0\0",
        );
        m.step(&mut buffers).unwrap();

        // Post-error frames are discarded
        feed(&mut buffers, msg_type::DATA_ROW, &binary_int4_row(9));
        m.step(&mut buffers).unwrap();

        feed(&mut buffers, msg_type::READY_FOR_QUERY, b"E");
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::Finished));
        assert_eq!(m.transaction_status(), TransactionStatus::Failed);
        assert_eq!(m.take_error().unwrap().sqlstate(), Some("23505"));
        assert!(handler.rows().is_empty());
    }

    #[test]
    fn close_statement_flow() {
        let registry = Arc::new(TypeRegistry::new());
        let mut handler = crate::row::DropHandler::new();
        let mut buffers = BufferSet::new();
        let mut m = ExecuteMachine::close_statement(&mut handler, registry, "s1");
        m.step(&mut buffers).unwrap();
        assert_eq!(buffers.write_buffer[0], b'C');

        feed(&mut buffers, msg_type::CLOSE_COMPLETE, b"");
        m.step(&mut buffers).unwrap();
        feed(&mut buffers, msg_type::READY_FOR_QUERY, b"I");
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::Finished));
    }
}
