//! Authentication messages and the SCRAM-SHA-256 client.

use crate::protocol::codec::MessageBuilder;

/// Write a PasswordMessage (cleartext or MD5 hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Compute MD5 password hash.
///
/// PostgreSQL MD5 password format: "md5" + md5(md5(password + username) + salt)
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::{Digest, Md5};

    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    let first_hash = hasher.finalize();
    let first_hash_hex = format!("{:x}", first_hash);

    let mut hasher = Md5::new();
    hasher.update(first_hash_hex.as_bytes());
    hasher.update(salt);
    let second_hash = hasher.finalize();

    format!("md5{:x}", second_hash)
}

/// Write a SASLInitialResponse message.
///
/// mechanism: SASL mechanism name (e.g., "SCRAM-SHA-256")
/// initial_response: Client-first-message for SCRAM
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse message.
///
/// response: Client-final-message for SCRAM
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

/// GS2 header declaring no channel binding.
const GS2_HEADER: &str = "n,,";

/// Escape a username for inclusion in a SCRAM message (RFC 5802 saslname):
/// `=` becomes `=3D`, `,` becomes `=2C`.
fn saslname(user: &str) -> String {
    let mut out = String::with_capacity(user.len());
    for c in user.chars() {
        match c {
            '=' => out.push_str("=3D"),
            ',' => out.push_str("=2C"),
            _ => out.push(c),
        }
    }
    out
}

/// SCRAM-SHA-256 client implementation.
///
/// Three external steps, driven by the incoming SASL sub-messages:
/// [`client_first_message`](Self::client_first_message) →
/// [`process_server_first`](Self::process_server_first) →
/// [`verify_server_final`](Self::verify_server_final).
pub struct ScramClient {
    /// Client nonce
    nonce: String,
    /// Username (unescaped)
    user: String,
    /// Password
    password: String,
    /// Auth message for signature verification
    auth_message: Option<String>,
    /// Salted password for server signature verification
    salted_password: Option<[u8; 32]>,
}

impl ScramClient {
    /// Create a new SCRAM client with a random nonce.
    pub fn new(user: &str, password: &str) -> Self {
        use rand::Rng;

        // 24 random bytes, base64 encoded, form the client nonce
        let mut nonce_bytes = [0u8; 24];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, nonce_bytes);

        Self::with_nonce(user, password, nonce)
    }

    /// Create a SCRAM client with an explicit nonce (deterministic exchanges).
    pub(crate) fn with_nonce(user: &str, password: &str, nonce: String) -> Self {
        Self {
            nonce,
            user: user.to_string(),
            password: password.to_string(),
            auth_message: None,
            salted_password: None,
        }
    }

    /// Generate the client-first-message, GS2 header included.
    pub fn client_first_message(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_message_bare())
    }

    /// The bare client-first-message (without the GS2 prefix).
    fn client_first_message_bare(&self) -> String {
        format!("n={},r={}", saslname(&self.user), self.nonce)
    }

    /// Process server-first-message and generate client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String, String> {
        use base64::Engine;
        use hmac::{Hmac, Mac};
        use pbkdf2::pbkdf2_hmac;
        use sha2::{Digest, Sha256};

        // Parse server-first-message: r=<nonce>,s=<salt>,i=<iterations>
        let mut combined_nonce = None;
        let mut salt_b64 = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt_b64 = Some(value);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = value.parse().ok();
            }
        }

        let combined_nonce = combined_nonce.ok_or("missing nonce in server-first-message")?;
        let salt_b64 = salt_b64.ok_or("missing salt in server-first-message")?;
        let iterations: u32 = iterations.ok_or("missing iterations in server-first-message")?;

        // The server nonce must extend our client nonce
        if !combined_nonce.starts_with(&self.nonce) {
            return Err("server nonce does not start with client nonce".to_string());
        }

        let salt = base64::engine::general_purpose::STANDARD
            .decode(salt_b64)
            .map_err(|e| format!("invalid salt: {}", e))?;

        // SaltedPassword = Hi(password, salt, iterations)
        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );
        self.salted_password = Some(salted_password);

        // ClientKey = HMAC(SaltedPassword, "Client Key")
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&salted_password)
            .map_err(|e| format!("HMAC error: {}", e))?;
        mac.update(b"Client Key");
        let client_key = mac.finalize().into_bytes();

        // StoredKey = H(ClientKey)
        let stored_key = Sha256::digest(client_key);

        // Channel binding is fixed: base64 of the GS2 header
        let channel_binding_b64 =
            base64::engine::general_purpose::STANDARD.encode(GS2_HEADER.as_bytes());

        let client_final_without_proof = format!("c={},r={}", channel_binding_b64, combined_nonce);

        // AuthMessage = client-first-bare + "," + server-first + "," + client-final-without-proof
        let auth_message = format!(
            "{},{},{}",
            self.client_first_message_bare(),
            server_first,
            client_final_without_proof
        );
        self.auth_message = Some(auth_message.clone());

        // ClientSignature = HMAC(StoredKey, AuthMessage)
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&stored_key)
            .map_err(|e| format!("HMAC error: {}", e))?;
        mac.update(auth_message.as_bytes());
        let client_signature = mac.finalize().into_bytes();

        // ClientProof = ClientKey XOR ClientSignature
        let mut client_proof = [0u8; 32];
        for i in 0..32 {
            client_proof[i] = client_key[i] ^ client_signature[i];
        }

        let proof_b64 = base64::engine::general_purpose::STANDARD.encode(client_proof);
        Ok(format!("{},p={}", client_final_without_proof, proof_b64))
    }

    /// Verify server-final-message.
    ///
    /// A payload carrying `e=` is an authentication failure; otherwise the
    /// `v=` server signature must match our own computation.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), String> {
        use base64::Engine;
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(format!("server rejected authentication: {}", err));
        }

        let server_signature_b64 = server_final
            .strip_prefix("v=")
            .ok_or("invalid server-final-message format")?;

        let server_signature = base64::engine::general_purpose::STANDARD
            .decode(server_signature_b64)
            .map_err(|e| format!("invalid server signature: {}", e))?;

        let salted_password = self
            .salted_password
            .as_ref()
            .ok_or("missing salted password")?;
        let auth_message = self.auth_message.as_ref().ok_or("missing auth message")?;

        // ServerKey = HMAC(SaltedPassword, "Server Key")
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(salted_password)
            .map_err(|e| format!("HMAC error: {}", e))?;
        mac.update(b"Server Key");
        let server_key = mac.finalize().into_bytes();

        // ServerSignature = HMAC(ServerKey, AuthMessage)
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&server_key)
            .map_err(|e| format!("HMAC error: {}", e))?;
        mac.update(auth_message.as_bytes());
        let expected_signature = mac.finalize().into_bytes();

        if server_signature.as_slice() != expected_signature.as_slice() {
            return Err("server signature verification failed".to_string());
        }

        Ok(())
    }
}
