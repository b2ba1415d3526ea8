//! EIP-712 signing of CTF Exchange orders (§6 Order submission), adapted
//! from the teacher's `order_builder` module into a narrow injected
//! trait (§9 design notes: capability handle, not a concrete import).

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use ethers::utils::keccak256;
use rand::Rng;
use thiserror::Error;

use crate::wire::SignedOrderWire;

const EIP712_DOMAIN_NAME: &str = "Polymarket CTF Exchange";
const EIP712_DOMAIN_VERSION: &str = "1";
const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
const NEG_RISK_CTF_EXCHANGE: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";

fn exchange_address(neg_risk: bool) -> Address {
    let addr = if neg_risk { NEG_RISK_CTF_EXCHANGE } else { CTF_EXCHANGE };
    addr.parse().expect("valid exchange address constant")
}

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// A request to sign one leg of a complete-set order: one outcome's
/// buy order at the executor's computed price and size.
pub struct OrderSigningRequest {
    pub token_id: String,
    /// Price, 0 < price < 1, already rounded to the outcome's tick grid.
    pub price: f64,
    /// Token count, already rounded to the outcome's size precision.
    pub size: f64,
    /// `price * size`, already rounded to the outcome's usd_digits
    /// precision (§4.6 sizing and rounding table).
    pub cost_usd: f64,
    pub maker: String,
    pub taker: String,
    pub fee_rate_bps: u64,
    pub expiration: u64,
    pub nonce: u64,
    pub signature_type: u8,
    pub neg_risk: bool,
}

/// Delegated EIP-712 order signing (§6, §9). Implementations own the
/// signing key; the executor never sees private key material.
#[async_trait]
pub trait OrderSigner: Send + Sync {
    async fn sign(&self, req: OrderSigningRequest) -> Result<SignedOrderWire, SignerError>;

    /// The address this signer signs as (used to populate `signer` on
    /// orders where `maker` differs, e.g. a proxy wallet funder).
    fn signer_address(&self) -> String;
}

fn encode_address(addr: Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr.as_bytes());
    out
}

fn encode_uint256(value: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

fn encode_uint8(value: u8) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[31] = value;
    out
}

struct OrderStructFields {
    salt: U256,
    maker: Address,
    signer: Address,
    taker: Address,
    token_id: U256,
    maker_amount: U256,
    taker_amount: U256,
    expiration: U256,
    nonce: U256,
    fee_rate_bps: U256,
    side: u8,
    signature_type: u8,
}

fn compute_domain_separator(chain_id: u64, neg_risk: bool) -> [u8; 32] {
    let type_hash = keccak256(
        b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    );
    let name_hash = keccak256(EIP712_DOMAIN_NAME.as_bytes());
    let version_hash = keccak256(EIP712_DOMAIN_VERSION.as_bytes());

    let mut encoded = Vec::with_capacity(160);
    encoded.extend_from_slice(&type_hash);
    encoded.extend_from_slice(&name_hash);
    encoded.extend_from_slice(&version_hash);
    encoded.extend_from_slice(&encode_uint256(U256::from(chain_id)));
    encoded.extend_from_slice(&encode_address(exchange_address(neg_risk)));
    keccak256(&encoded)
}

fn compute_struct_hash(order: &OrderStructFields) -> [u8; 32] {
    let type_hash = keccak256(
        b"Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)",
    );

    let mut encoded = Vec::with_capacity(32 * 13);
    encoded.extend_from_slice(&type_hash);
    encoded.extend_from_slice(&encode_uint256(order.salt));
    encoded.extend_from_slice(&encode_address(order.maker));
    encoded.extend_from_slice(&encode_address(order.signer));
    encoded.extend_from_slice(&encode_address(order.taker));
    encoded.extend_from_slice(&encode_uint256(order.token_id));
    encoded.extend_from_slice(&encode_uint256(order.maker_amount));
    encoded.extend_from_slice(&encode_uint256(order.taker_amount));
    encoded.extend_from_slice(&encode_uint256(order.expiration));
    encoded.extend_from_slice(&encode_uint256(order.nonce));
    encoded.extend_from_slice(&encode_uint256(order.fee_rate_bps));
    encoded.extend_from_slice(&encode_uint8(order.side));
    encoded.extend_from_slice(&encode_uint8(order.signature_type));
    keccak256(&encoded)
}

fn compute_eip712_hash(order: &OrderStructFields, chain_id: u64, neg_risk: bool) -> [u8; 32] {
    let domain_separator = compute_domain_separator(chain_id, neg_risk);
    let struct_hash = compute_struct_hash(order);
    let mut message = Vec::with_capacity(66);
    message.extend_from_slice(b"\x19\x01");
    message.extend_from_slice(&domain_separator);
    message.extend_from_slice(&struct_hash);
    keccak256(&message)
}

/// Converts a USD amount into its 6-decimal fixed-point integer wire
/// representation (§6 "USD amounts are encoded as 6-decimal-fixed
/// integers").
fn usd_to_wire_amount(usd: f64) -> U256 {
    U256::from((usd * 1_000_000.0).round() as u64)
}

fn random_salt() -> U256 {
    U256::from(rand::thread_rng().gen::<u64>())
}

/// Signs orders with a local EOA/proxy-funded wallet, the EIP-712
/// encoding lifted from the teacher's `order_builder::signing` module.
pub struct Eip712Signer {
    wallet: LocalWallet,
    chain_id: u64,
}

impl Eip712Signer {
    pub fn new(private_key: &str, chain_id: u64) -> Result<Self, SignerError> {
        let key = private_key.trim_start_matches("0x");
        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|_| SignerError::InvalidPrivateKey)?
            .with_chain_id(chain_id);
        Ok(Self { wallet, chain_id })
    }
}

#[async_trait]
impl OrderSigner for Eip712Signer {
    async fn sign(&self, req: OrderSigningRequest) -> Result<SignedOrderWire, SignerError> {
        let maker: Address =
            req.maker.parse().map_err(|_| SignerError::SigningFailed("invalid maker".into()))?;
        let signer: Address = self.wallet.address();
        let taker: Address =
            req.taker.parse().map_err(|_| SignerError::SigningFailed("invalid taker".into()))?;
        let token_id = U256::from_dec_str(&req.token_id)
            .map_err(|_| SignerError::SigningFailed("invalid token id".into()))?;

        let fields = OrderStructFields {
            salt: random_salt(),
            maker,
            signer,
            taker,
            token_id,
            maker_amount: usd_to_wire_amount(req.cost_usd),
            taker_amount: U256::from((req.size * 1_000_000.0).round() as u64),
            expiration: U256::from(req.expiration),
            nonce: U256::from(req.nonce),
            fee_rate_bps: U256::from(req.fee_rate_bps),
            side: 0, // BUY: complete-set arbitrage only ever buys.
            signature_type: req.signature_type,
        };

        let hash = compute_eip712_hash(&fields, self.chain_id, req.neg_risk);
        let signature = self
            .wallet
            .sign_hash(hash.into())
            .map_err(|e| SignerError::SigningFailed(e.to_string()))?;

        Ok(SignedOrderWire {
            salt: fields.salt.as_u64() as i64,
            maker: ethers::utils::to_checksum(&fields.maker, None),
            signer: ethers::utils::to_checksum(&fields.signer, None),
            taker: ethers::utils::to_checksum(&fields.taker, None),
            token_id: req.token_id,
            maker_amount: fields.maker_amount.to_string(),
            taker_amount: fields.taker_amount.to_string(),
            side: "BUY",
            expiration: fields.expiration.to_string(),
            nonce: fields.nonce.to_string(),
            fee_rate_bps: fields.fee_rate_bps.to_string(),
            signature_type: fields.signature_type as i32,
            signature: format!("0x{}", hex::encode(signature.to_vec())),
        })
    }

    fn signer_address(&self) -> String {
        ethers::utils::to_checksum(&self.wallet.address(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> &'static str {
        "0x1234567890123456789012345678901234567890123456789012345678901234"
    }

    #[test]
    fn domain_separator_differs_by_neg_risk() {
        let regular = compute_domain_separator(137, false);
        let neg_risk = compute_domain_separator(137, true);
        assert_ne!(regular, neg_risk);
    }

    #[tokio::test]
    async fn signs_and_reports_address() {
        let signer = Eip712Signer::new(test_key(), 137).unwrap();
        let addr = signer.signer_address();
        assert!(addr.starts_with("0x"));

        let req = OrderSigningRequest {
            token_id: "123456".into(),
            price: 0.48,
            size: 150.0,
            cost_usd: 72.0,
            maker: addr.clone(),
            taker: "0x0000000000000000000000000000000000000000".into(),
            fee_rate_bps: 0,
            expiration: 0,
            nonce: 0,
            signature_type: 0,
            neg_risk: false,
        };
        let signed = signer.sign(req).await.unwrap();
        assert!(signed.signature.starts_with("0x"));
        assert_eq!(signed.side, "BUY");
        assert_eq!(signed.maker_amount, "72000000");
    }

    #[test]
    fn invalid_private_key_is_rejected() {
        assert!(Eip712Signer::new("not-a-key", 137).is_err());
    }
}
