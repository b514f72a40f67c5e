//! Connection startup and authentication state machine.

use crate::buffer::BufferSet;
use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::{
    msg_type, AuthenticationMessage, BackendKeyData, ErrorResponse, NoticeResponse,
    NotificationResponse, ParameterStatus, RawMessage, ReadyForQuery,
};
use crate::protocol::frontend::auth::{md5_password, ScramClient};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_ssl_request,
    write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::action::{Action, AsyncMessage};

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    WaitingSslResponse,
    SslHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
    Failed,
}

/// Connection startup state machine: SSL negotiation, authentication
/// dispatch, and parameter collection up to the first ReadyForQuery.
pub struct ConnectionStateMachine {
    state: ConnectionState,
    options: Opts,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    scram_client: Option<ScramClient>,
    ssl_response: Option<u8>,
}

impl ConnectionStateMachine {
    /// Create a new connection state machine.
    pub fn new(options: Opts) -> Self {
        Self {
            state: ConnectionState::Initial,
            options,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            scram_client: None,
            ssl_response: None,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the backend key data (for cancellation).
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Take the collected server parameters.
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    /// Get the current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Hand the single-byte SSL negotiation response to the machine.
    pub fn set_ssl_response(&mut self, byte: u8) {
        self.ssl_response = Some(byte);
    }

    /// Advance the machine.
    pub fn step(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        match self.state {
            ConnectionState::Initial => {
                buffers.write_buffer.clear();
                if self.options.ssl_mode == SslMode::Disable {
                    self.write_startup_message(buffers);
                    self.state = ConnectionState::WaitingAuth;
                    Ok(Action::WriteAndReadMessage)
                } else {
                    write_ssl_request(&mut buffers.write_buffer);
                    self.state = ConnectionState::WaitingSslResponse;
                    Ok(Action::WriteAndReadByte)
                }
            }
            ConnectionState::WaitingSslResponse => self.process_ssl_response(),
            ConnectionState::SslHandshake => {
                buffers.write_buffer.clear();
                self.write_startup_message(buffers);
                self.state = ConnectionState::WaitingAuth;
                Ok(Action::WriteAndReadMessage)
            }
            _ => self.process_message(buffers),
        }
    }

    fn process_ssl_response(&mut self) -> Result<Action> {
        let response = self
            .ssl_response
            .take()
            .ok_or_else(|| Error::Protocol("SSL response byte not provided".into()))?;

        match response {
            b'S' => {
                self.state = ConnectionState::SslHandshake;
                Ok(Action::TlsHandshake)
            }
            b'N' => {
                self.state = ConnectionState::Failed;
                Err(Error::Auth("server does not support SSL".into()))
            }
            _ => {
                self.state = ConnectionState::Failed;
                Err(Error::Protocol(format!(
                    "unexpected SSL response: {}",
                    response
                )))
            }
        }
    }

    fn process_message(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        let type_byte = buffers.type_byte;

        // Async messages can arrive at any point during startup
        if RawMessage::is_async_type(type_byte) {
            return self.handle_async_message(type_byte, &buffers.read_buffer);
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffers.read_buffer)?;
            self.state = ConnectionState::Failed;
            return Err(error.into_error());
        }

        match self.state {
            ConnectionState::WaitingAuth => self.handle_auth_message(buffers),
            ConnectionState::SaslInProgress => self.handle_sasl_message(buffers),
            ConnectionState::WaitingAuthResult => self.handle_auth_result(buffers),
            ConnectionState::WaitingReady => self.handle_ready_message(buffers),
            _ => Err(Error::Protocol(format!(
                "unexpected message in state {:?}",
                self.state
            ))),
        }
    }

    fn write_startup_message(&mut self, buffers: &mut BufferSet) {
        let encoding = self.options.client_encoding.as_startup_value();
        let mut params: Vec<(&str, &str)> =
            vec![("user", &self.options.user), ("client_encoding", encoding)];

        if let Some(ref db) = self.options.database {
            params.push(("database", db));
        }

        if let Some(ref app) = self.options.application_name {
            params.push(("application_name", app));
        }

        if let Some(replication) = self.options.replication.as_startup_value() {
            params.push(("replication", replication));
        }

        for (name, value) in &self.options.params {
            params.push((name, value));
        }

        write_startup(&mut buffers.write_buffer, &params);
    }

    fn password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("password required but not provided".into()))
    }

    fn handle_auth_message(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        if buffers.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "expected Authentication message, got '{}'",
                buffers.type_byte as char
            )));
        }
        let auth = AuthenticationMessage::parse(&buffers.read_buffer)?;

        match auth {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            AuthenticationMessage::CleartextPassword => {
                let password = self.password()?.to_string();
                buffers.write_buffer.clear();
                write_password(&mut buffers.write_buffer, &password);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.options.user, self.password()?, &salt);
                buffers.write_buffer.clear();
                write_password(&mut buffers.write_buffer, &hashed);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                // Always pick the non-PLUS variant, even over TLS
                if !mechanisms.iter().any(|m| *m == "SCRAM-SHA-256") {
                    return Err(Error::Auth(format!(
                        "no supported SASL mechanism, server offers: {:?}",
                        mechanisms
                    )));
                }

                let scram = ScramClient::new(&self.options.user, self.password()?);
                let client_first = scram.client_first_message();

                buffers.write_buffer.clear();
                write_sasl_initial_response(
                    &mut buffers.write_buffer,
                    "SCRAM-SHA-256",
                    client_first.as_bytes(),
                );

                self.scram_client = Some(scram);
                self.state = ConnectionState::SaslInProgress;
                Ok(Action::WriteAndReadMessage)
            }
            _ => Err(Error::Unsupported(format!(
                "unsupported authentication method: {:?}",
                auth
            ))),
        }
    }

    fn handle_sasl_message(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        if buffers.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "expected Authentication message, got '{}'",
                buffers.type_byte as char
            )));
        }
        let auth = AuthenticationMessage::parse(&buffers.read_buffer)?;

        match auth {
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-first-message: {}", e)))?
                    .to_string();

                let scram = self
                    .scram_client
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;

                let client_final = scram
                    .process_server_first(&server_first)
                    .map_err(Error::Auth)?;

                buffers.write_buffer.clear();
                write_sasl_response(&mut buffers.write_buffer, client_final.as_bytes());
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-final-message: {}", e)))?;

                let scram = self
                    .scram_client
                    .as_ref()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;

                scram.verify_server_final(server_final).map_err(Error::Auth)?;

                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            _ => Err(Error::Protocol(format!(
                "unexpected SASL message: {:?}",
                auth
            ))),
        }
    }

    fn handle_auth_result(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        if buffers.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "expected Authentication message, got '{}'",
                buffers.type_byte as char
            )));
        }
        let auth = AuthenticationMessage::parse(&buffers.read_buffer)?;

        match auth {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            _ => Err(Error::Auth(format!("unexpected auth result: {:?}", auth))),
        }
    }

    fn handle_ready_message(&mut self, buffers: &mut BufferSet) -> Result<Action> {
        let payload = &buffers.read_buffer;

        match buffers.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                self.backend_key = Some(*key);
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                self.state = ConnectionState::Ready;
                Ok(Action::Finished)
            }
            _ => Err(Error::Protocol(format!(
                "unexpected message during startup: '{}'",
                buffers.type_byte as char
            ))),
        }
    }

    fn handle_async_message(&mut self, type_byte: u8, payload: &[u8]) -> Result<Action> {
        match type_byte {
            msg_type::NOTICE_RESPONSE => {
                let notice = NoticeResponse::parse(payload)?;
                Ok(Action::HandleAsyncMessage(AsyncMessage::Notice(notice.0)))
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                // Keep the cached value current
                if let Some(entry) = self
                    .server_params
                    .iter_mut()
                    .find(|(name, _)| name == param.name)
                {
                    entry.1 = param.value.to_string();
                } else {
                    self.server_params
                        .push((param.name.to_string(), param.value.to_string()));
                }
                Ok(Action::HandleAsyncMessage(AsyncMessage::ParameterChanged {
                    name: param.name.to_string(),
                    value: param.value.to_string(),
                }))
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let notification = NotificationResponse::parse(payload)?;
                Ok(Action::HandleAsyncMessage(AsyncMessage::Notification {
                    pid: notification.pid,
                    channel: notification.channel.to_string(),
                    payload: notification.payload.to_string(),
                }))
            }
            _ => Err(Error::Protocol(format!(
                "unknown async message type: '{}'",
                type_byte as char
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(ssl_mode: SslMode) -> ConnectionStateMachine {
        ConnectionStateMachine::new(Opts {
            user: "alice".into(),
            database: Some("app".into()),
            password: Some("secret".into()),
            ssl_mode,
            ..Opts::default()
        })
    }

    fn feed(buffers: &mut BufferSet, type_byte: u8, payload: &[u8]) {
        buffers.type_byte = type_byte;
        buffers.read_buffer.clear();
        buffers.read_buffer.extend_from_slice(payload);
    }

    #[test]
    fn plaintext_startup_flow() {
        let mut m = machine(SslMode::Disable);
        let mut buffers = BufferSet::new();

        // Initial step writes the startup message
        assert!(matches!(
            m.step(&mut buffers).unwrap(),
            Action::WriteAndReadMessage
        ));
        assert!(!buffers.write_buffer.is_empty());
        assert_eq!(m.state(), ConnectionState::WaitingAuth);

        // AuthenticationOk
        feed(&mut buffers, msg_type::AUTHENTICATION, &0_i32.to_be_bytes());
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::ReadMessage));

        // BackendKeyData
        let mut key = 7_u32.to_be_bytes().to_vec();
        key.extend_from_slice(&9_u32.to_be_bytes());
        feed(&mut buffers, msg_type::BACKEND_KEY_DATA, &key);
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::ReadMessage));

        // ParameterStatus arrives as an async message
        feed(
            &mut buffers,
            msg_type::PARAMETER_STATUS,
            b"server_version\016.2\0",
        );
        assert!(matches!(
            m.step(&mut buffers).unwrap(),
            Action::HandleAsyncMessage(AsyncMessage::ParameterChanged { .. })
        ));

        // ReadyForQuery (idle)
        feed(&mut buffers, msg_type::READY_FOR_QUERY, b"I");
        assert!(matches!(m.step(&mut buffers).unwrap(), Action::Finished));
        assert_eq!(m.state(), ConnectionState::Ready);
        assert_eq!(m.backend_key().unwrap().process_id(), 7);
        assert_eq!(
            m.take_server_params(),
            vec![("server_version".to_string(), "16.2".to_string())]
        );
    }

    #[test]
    fn ssl_refusal_fails_when_required() {
        let mut m = machine(SslMode::Require);
        let mut buffers = BufferSet::new();

        assert!(matches!(
            m.step(&mut buffers).unwrap(),
            Action::WriteAndReadByte
        ));
        // SSLRequest is 8 bytes with no type tag
        assert_eq!(buffers.write_buffer.len(), 8);

        m.set_ssl_response(b'N');
        assert!(m.step(&mut buffers).is_err());
        assert_eq!(m.state(), ConnectionState::Failed);
    }

    #[test]
    fn ssl_acceptance_requests_handshake() {
        let mut m = machine(SslMode::VerifyFull);
        let mut buffers = BufferSet::new();

        m.step(&mut buffers).unwrap();
        m.set_ssl_response(b'S');
        assert!(matches!(
            m.step(&mut buffers).unwrap(),
            Action::TlsHandshake
        ));
        // After the handshake the startup message goes out
        assert!(matches!(
            m.step(&mut buffers).unwrap(),
            Action::WriteAndReadMessage
        ));
    }

    #[test]
    fn sasl_flow_picks_scram_sha_256() {
        let mut m = machine(SslMode::Disable);
        let mut buffers = BufferSet::new();
        m.step(&mut buffers).unwrap();

        let mut sasl = 10_i32.to_be_bytes().to_vec();
        sasl.extend_from_slice(b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        feed(&mut buffers, msg_type::AUTHENTICATION, &sasl);

        assert!(matches!(
            m.step(&mut buffers).unwrap(),
            Action::WriteAndReadMessage
        ));
        assert_eq!(m.state(), ConnectionState::SaslInProgress);
        // SASLInitialResponse names the non-PLUS mechanism
        let written = String::from_utf8_lossy(&buffers.write_buffer);
        assert!(written.contains("SCRAM-SHA-256"));
        assert!(!written.contains("SCRAM-SHA-256-PLUS"));
    }

    #[test]
    fn missing_scram_mechanism_is_auth_error() {
        let mut m = machine(SslMode::Disable);
        let mut buffers = BufferSet::new();
        m.step(&mut buffers).unwrap();

        let mut sasl = 10_i32.to_be_bytes().to_vec();
        sasl.extend_from_slice(b"OTHER-MECH\0\0");
        feed(&mut buffers, msg_type::AUTHENTICATION, &sasl);

        assert!(matches!(m.step(&mut buffers), Err(Error::Auth(_))));
    }

    #[test]
    fn error_response_during_startup_fails() {
        let mut m = machine(SslMode::Disable);
        let mut buffers = BufferSet::new();
        m.step(&mut buffers).unwrap();

        feed(
            &mut buffers,
            msg_type::ERROR_RESPONSE,
            b"SFATAL\0C28P01\0Mpassword authentication failed\0\0",
        );
        let err = m.step(&mut buffers).unwrap_err();
        assert_eq!(err.sqlstate(), Some("28P01"));
        assert_eq!(m.state(), ConnectionState::Failed);
    }
}
