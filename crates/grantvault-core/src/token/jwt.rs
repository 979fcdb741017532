//! Signed ID tokens and JWT access tokens.
//!
//! Supports RS256, RS384 and ES384 signing keys. Clients that register an
//! `id_token_encrypted_response_alg` need a JWE-capable issuer; the
//! [`JwtIdTokenIssuer`] here only signs and rejects them.
//! [`JwtAccessTokenSigner`] signs access tokens for clients registered with
//! `access_token_as_jwt`.
//!
//! ## Example
//!
//! ```ignore
//! use grantvault_core::token::jwt::{
//!     JwtAccessTokenSigner, JwtIdTokenIssuer, JwtService, SigningAlgorithm, SigningKeyPair,
//! };
//!
//! let key_pair = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256)?;
//! let issuer = JwtIdTokenIssuer::new(JwtService::new(key_pair, "https://auth.example.com"));
//! let signer = JwtAccessTokenSigner::new(issuer.jwt().clone());
//! let services = GrantServices::new(config)
//!     .with_id_token_issuer(Arc::new(issuer))
//!     .with_access_token_signer(Arc::new(signer));
//! ```

use std::fmt;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::EncodePrivateKey as EcEncodePrivateKey;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384};
use uuid::Uuid;

use crate::error::{GrantError, GrantResult};
use crate::services::{AccessTokenRequest, AccessTokenSigner, IdTokenIssuer, IdTokenRequest};

const RSA_KEY_BITS: usize = 2048;

/// Signing and verification failures.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// The key could not be generated or loaded.
    #[error("signing key unusable: {0}")]
    Key(String),

    #[error("token could not be signed: {0}")]
    Sign(String),

    /// Bad signature, wrong issuer, or expired.
    #[error("token rejected: {0}")]
    Verify(String),
}

fn key_error(err: impl fmt::Display) -> JwtError {
    JwtError::Key(err.to_string())
}

impl From<JwtError> for GrantError {
    fn from(err: JwtError) -> Self {
        GrantError::issuance(err.to_string())
    }
}

/// ID token signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    RS256,
    RS384,
    /// ECDSA over P-384.
    ES384,
}

impl SigningAlgorithm {
    #[must_use]
    pub fn jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Name used in JWT headers and in `id_token_signed_response_alg`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }

    /// OIDC left-half hash (`at_hash`, `c_hash`) of `value` using the hash
    /// function paired with this algorithm.
    #[must_use]
    pub fn left_half_hash(&self, value: &str) -> String {
        let digest: Vec<u8> = match self {
            Self::RS256 => Sha256::digest(value.as_bytes()).to_vec(),
            Self::RS384 | Self::ES384 => Sha384::digest(value.as_bytes()).to_vec(),
        };
        URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims of an OpenID Connect ID token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdTokenClaims {
    pub iss: String,
    /// User id, or the client id when the grant has no user.
    pub sub: String,
    /// Client id.
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub grant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,
    /// Space-joined scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Claims of an access token issued as a JWT.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    pub iss: String,
    /// User id, or the client id when the grant has no user.
    pub sub: String,
    pub aud: String,
    pub client_id: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
    pub token_type: String,
    pub grant_id: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(
        rename = "x5t#S256",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub x5t_s256: Option<String>,
}

/// Private and public halves of a signing key, with its `kid`.
#[derive(Clone)]
pub struct SigningKeyPair {
    pub kid: String,
    pub algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SigningKeyPair {
    fn with_keys(
        algorithm: SigningAlgorithm,
        encoding_key: EncodingKey,
        decoding_key: DecodingKey,
    ) -> Self {
        Self {
            kid: Uuid::new_v4().to_string(),
            algorithm,
            encoding_key,
            decoding_key,
        }
    }

    /// Generates a 2048-bit RSA key for `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::Key` if `algorithm` is not an RSA algorithm or
    /// generation fails.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        if !algorithm.is_rsa() {
            return Err(JwtError::Key(format!("{algorithm} cannot use an RSA key")));
        }
        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(key_error)?;
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(key_error)?;
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(key_error)?;

        Ok(Self::with_keys(
            algorithm,
            EncodingKey::from_rsa_pem(private_pem.as_bytes()).map_err(key_error)?,
            DecodingKey::from_rsa_pem(public_pem.as_bytes()).map_err(key_error)?,
        ))
    }

    /// Generates a P-384 key for ES384.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::Key` if the key cannot be encoded.
    pub fn generate_ec() -> Result<Self, JwtError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        // jsonwebtoken reads EC private keys from PKCS8 PEM only
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(key_error)?;
        let point = EcSigningKey::from(&secret_key)
            .verifying_key()
            .to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(JwtError::Key("P-384 public point has no coordinates".to_string()));
        };

        Ok(Self::with_keys(
            SigningAlgorithm::ES384,
            EncodingKey::from_ec_pem(private_pem.as_bytes()).map_err(key_error)?,
            DecodingKey::from_ec_components(
                &URL_SAFE_NO_PAD.encode(x.as_slice()),
                &URL_SAFE_NO_PAD.encode(y.as_slice()),
            )
            .map_err(key_error)?,
        ))
    }
}

/// Signs and verifies JWTs for one issuer with one key.
#[derive(Clone)]
pub struct JwtService {
    key: SigningKeyPair,
    issuer: String,
}

impl JwtService {
    #[must_use]
    pub fn new(key: SigningKeyPair, issuer: impl Into<String>) -> Self {
        Self {
            key,
            issuer: issuer.into(),
        }
    }

    /// Signs `claims`, tagging the header with the key's `kid`.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::Sign` if serialization or signing fails.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.key.algorithm.jwt_algorithm());
        header.kid = Some(self.key.kid.clone());
        encode(&header, claims, &self.key.encoding_key).map_err(|e| JwtError::Sign(e.to_string()))
    }

    /// Checks signature, issuer and expiry. The audience is left to the
    /// relying party.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::Verify` if any check fails.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<TokenData<T>, JwtError> {
        let mut validation = Validation::new(self.key.algorithm.jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.validate_aud = false;
        decode(token, &self.key.decoding_key, &validation)
            .map_err(|e| JwtError::Verify(e.to_string()))
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.key.algorithm
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

/// Issues signed ID tokens through a [`JwtService`].
pub struct JwtIdTokenIssuer {
    jwt: JwtService,
}

impl JwtIdTokenIssuer {
    #[must_use]
    pub fn new(jwt: JwtService) -> Self {
        Self { jwt }
    }

    #[must_use]
    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    fn claims(&self, request: &IdTokenRequest) -> Result<IdTokenClaims, JwtError> {
        let alg = self.jwt.algorithm();
        let iat = request.issued_at.unix_timestamp();
        let exp = iat.checked_add(request.lifetime_secs).ok_or_else(|| {
            JwtError::Sign(format!("lifetime of {}s overflows exp", request.lifetime_secs))
        })?;
        let scope = (!request.scopes.is_empty()).then(|| request.scopes.join(" "));
        Ok(IdTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: request
                .user
                .as_ref()
                .map_or_else(|| request.client.client_id.clone(), |u| u.id.clone()),
            aud: request.client.client_id.clone(),
            exp,
            iat,
            grant_id: request.grant_id.clone(),
            nonce: request.nonce.clone(),
            auth_time: request.authentication_time.map(|t| t.unix_timestamp()),
            acr: request.acr_values.clone(),
            at_hash: request.access_token.as_deref().map(|t| alg.left_half_hash(t)),
            c_hash: request
                .authorization_code
                .as_deref()
                .map(|c| alg.left_half_hash(c)),
            scope,
        })
    }
}

#[async_trait]
impl IdTokenIssuer for JwtIdTokenIssuer {
    async fn issue_id_token(&self, request: &IdTokenRequest) -> GrantResult<String> {
        let client = &request.client;
        if client.wants_encrypted_id_token() {
            return Err(GrantError::issuance(format!(
                "client '{}' requires encrypted ID tokens",
                client.client_id
            )));
        }
        if let Some(requested) = client.id_token_signed_response_alg.as_deref()
            && requested != self.jwt.algorithm().as_str()
        {
            return Err(GrantError::issuance(format!(
                "client '{}' requires {requested} but the signing key is {}",
                client.client_id,
                self.jwt.algorithm()
            )));
        }

        let claims = self.claims(request)?;
        Ok(self.jwt.sign(&claims)?)
    }
}

/// Signs access tokens through a [`JwtService`].
pub struct JwtAccessTokenSigner {
    jwt: JwtService,
}

impl JwtAccessTokenSigner {
    #[must_use]
    pub fn new(jwt: JwtService) -> Self {
        Self { jwt }
    }

    #[must_use]
    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    fn claims(&self, request: &AccessTokenRequest) -> AccessTokenClaims {
        let iat = request.issued_at.unix_timestamp();
        let client_id = request.client.client_id.clone();
        AccessTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: request
                .user
                .as_ref()
                .map_or_else(|| client_id.clone(), |u| u.id.clone()),
            aud: client_id.clone(),
            client_id,
            exp: request.expires_at.unix_timestamp(),
            iat,
            nbf: iat,
            jti: request.reference_id.clone(),
            token_type: if request.confirmation_hash.is_some() {
                "PoP".to_string()
            } else {
                "Bearer".to_string()
            },
            grant_id: request.grant_id.clone(),
            scope: request.scopes.clone(),
            username: request.user.as_ref().map(|u| u.username.clone()),
            acr: request.acr_values.clone(),
            auth_time: request.authentication_time.map(|t| t.unix_timestamp()),
            x5t_s256: request.confirmation_hash.clone(),
        }
    }
}

#[async_trait]
impl AccessTokenSigner for JwtAccessTokenSigner {
    async fn sign_access_token(&self, request: &AccessTokenRequest) -> GrantResult<String> {
        Ok(self.jwt.sign(&self.claims(request))?)
    }
}
