//! SCRAM-SHA-256 (RFC 5802 / RFC 7677) as PostgreSQL uses it.
//!
//! PostgreSQL ignores the SCRAM username (the startup `user` parameter wins)
//! and never offers channel binding over plain TCP, so the GS2 header is
//! always `n,,`.
//!
//! ```ignore
//! let scram = ScramSha256::new(user);
//! send(scram.initial_response());                     // SASLInitialResponse
//! let reply = scram.respond(password, &server_first)?; // after SASLContinue
//! send(reply.message.as_bytes());                      // SASLResponse
//! reply.verify(&server_final)?;                        // after SASLFinal
//! ```

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{PgNotifyError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const MECHANISM: &str = "SCRAM-SHA-256";

/// base64("n,,")
const GS2_HEADER_B64: &str = "biws";

fn auth_err(msg: impl Into<String>) -> PgNotifyError {
    PgNotifyError::Auth(format!("SCRAM: {}", msg.into()))
}

#[derive(Debug, Clone)]
pub struct ScramSha256 {
    nonce: String,
    client_first_bare: String,
}

/// The client-final-message plus what is needed to check the server's answer.
#[derive(Debug, Clone)]
pub struct ScramResponse {
    pub message: String,
    server_signature: [u8; 32],
}

impl ScramSha256 {
    pub fn new(user: &str) -> Self {
        let mut raw = [0u8; 18];
        rand::rng().fill_bytes(&mut raw);
        Self::with_nonce(user, &B64.encode(raw))
    }

    fn with_nonce(user: &str, nonce: &str) -> Self {
        let user = user.replace('=', "=3D").replace(',', "=2C");
        Self {
            nonce: nonce.to_string(),
            client_first_bare: format!("n={user},r={nonce}"),
        }
    }

    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// SASLInitialResponse body: mechanism, NUL, length-prefixed client-first.
    pub fn initial_response(&self) -> Vec<u8> {
        let first = self.client_first();
        let mut out = Vec::with_capacity(MECHANISM.len() + 5 + first.len());
        out.extend_from_slice(MECHANISM.as_bytes());
        out.push(0);
        out.extend_from_slice(&(first.len() as i32).to_be_bytes());
        out.extend_from_slice(first.as_bytes());
        out
    }

    pub fn respond(&self, password: &str, server_first: &str) -> Result<ScramResponse> {
        let challenge = ServerFirst::parse(server_first)?;
        if !challenge.nonce.starts_with(&self.nonce) || challenge.nonce.len() == self.nonce.len()
        {
            return Err(auth_err("server nonce does not extend the client nonce"));
        }
        let salt = B64
            .decode(challenge.salt)
            .map_err(|e| auth_err(format!("invalid salt: {e}")))?;
        if challenge.iterations == 0 {
            return Err(auth_err("iteration count must be positive"));
        }

        let without_proof = format!("c={GS2_HEADER_B64},r={}", challenge.nonce);
        let auth_message = format!(
            "{},{server_first},{without_proof}",
            self.client_first_bare
        );

        let salted = salted_password(password.as_bytes(), &salt, challenge.iterations);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key = Sha256::digest(client_key);
        let signature = hmac(&stored_key, auth_message.as_bytes());

        let mut proof = client_key;
        proof
            .iter_mut()
            .zip(signature)
            .for_each(|(p, s)| *p ^= s);

        let server_key = hmac(&salted, b"Server Key");
        Ok(ScramResponse {
            message: format!("{without_proof},p={}", B64.encode(proof)),
            server_signature: hmac(&server_key, auth_message.as_bytes()),
        })
    }
}

impl ScramResponse {
    /// Check the server-final-message, proving the server knows the password.
    pub fn verify(&self, server_final: &str) -> Result<()> {
        let mut verifier = None;
        for attr in server_final.split(',') {
            if let Some(e) = attr.strip_prefix("e=") {
                return Err(auth_err(format!("server rejected the exchange: {e}")));
            }
            if let Some(v) = attr.strip_prefix("v=") {
                verifier = Some(v.trim());
            }
        }
        let verifier = verifier.ok_or_else(|| auth_err("server-final missing verifier (v=)"))?;
        let got = B64
            .decode(verifier)
            .map_err(|e| auth_err(format!("invalid server signature: {e}")))?;

        if got.len() == self.server_signature.len() && ct_eq(&got, &self.server_signature) {
            Ok(())
        } else {
            Err(auth_err("server signature mismatch"))
        }
    }
}

struct ServerFirst<'a> {
    nonce: &'a str,
    salt: &'a str,
    iterations: u32,
}

impl<'a> ServerFirst<'a> {
    fn parse(msg: &'a str) -> Result<Self> {
        let (mut nonce, mut salt, mut iterations) = (None, None, None);
        for attr in msg.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => {
                    iterations = Some(
                        v.parse::<u32>()
                            .map_err(|_| auth_err(format!("invalid iteration count: {v}")))?,
                    )
                }
                Some(("m", _)) => return Err(auth_err("mandatory extension not supported")),
                _ => {}
            }
        }
        Ok(Self {
            nonce: nonce.ok_or_else(|| auth_err("server-first missing nonce (r=)"))?,
            salt: salt.ok_or_else(|| auth_err("server-first missing salt (s=)"))?,
            iterations: iterations
                .ok_or_else(|| auth_err("server-first missing iteration count (i=)"))?,
        })
    }
}

fn hmac(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length is always valid");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// Hi(): PBKDF2-HMAC-SHA-256 with a single output block.
fn salted_password(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut block = Vec::with_capacity(salt.len() + 4);
    block.extend_from_slice(salt);
    block.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac(password, &block);
    let mut out = u;
    for _ in 1..iterations {
        u = hmac(password, &u);
        out.iter_mut().zip(u).for_each(|(o, x)| *o ^= x);
    }
    out
}

/// Constant-time comparison of equal-length slices.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
