//! Canonical encoding, signing and recovery for a single oracle price point
use ethers_core::types::{Address, Signature, H256, U256};
use ethers_core::utils::keccak256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// 10^18, the fixed-point scale a float price is converted to/from before
/// it is signed
pub const PRICE_MULTIPLIER: f64 = 1_000_000_000_000_000_000.0;

#[derive(Debug, Error, PartialEq)]
pub enum PriceError {
    #[error("price has not been set")]
    PriceNotSet,
    #[error("recovered address does not match the claimed feeder")]
    SignatureMismatch,
}

/// An external collaborator capable of producing a secp256k1 signature over
/// a message hash. The act of signing (holding a private key) is out of
/// scope here; only this seam is defined.
pub trait PriceSigner {
    fn address(&self) -> Address;
    fn sign_hash(&self, hash: H256) -> Result<Signature, PriceError>;
}

impl PriceSigner for ethers_signers::LocalWallet {
    fn address(&self) -> Address {
        ethers_signers::Signer::address(self)
    }
    fn sign_hash(&self, hash: H256) -> Result<Signature, PriceError> {
        // Signing a raw 32-byte hash is a pure EC operation with no
        // encoding that can fail, unlike `sign_transaction_sync` (which
        // RLP-encodes first); the underlying call is infallible.
        Ok(ethers_signers::LocalWallet::sign_hash(self, hash))
    }
}

/// A single asset price (`wat`), scaled to a 256-bit fixed point integer,
/// stamped with an age and signed by a feeder.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedPrice {
    pub wat: String,
    pub val: U256,
    pub age: u64,
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl SignedPrice {
    pub fn new(wat: impl Into<String>, age: u64) -> Self {
        Self {
            wat: wat.into(),
            val: U256::zero(),
            age,
            v: 0,
            r: [0u8; 32],
            s: [0u8; 32],
        }
    }

    /// Scale `price` by [`PRICE_MULTIPLIER`] and store it as the integer
    /// `val`. `price == 0.0` stores `val == 0`, the "no price" sentinel.
    pub fn set_float64_price(&mut self, price: f64) {
        self.val = f64_to_u256(price);
    }

    /// The inverse of [`Self::set_float64_price`].
    pub fn float64_price(&self) -> f64 {
        u256_to_f64(self.val)
    }

    /// The canonical pre-image this price signs: three 32-byte big-endian
    /// fields (`val`, `age`, `wat`) concatenated and hashed with keccak256.
    pub fn hash(&self) -> H256 {
        let mut buf = [0u8; 96];
        self.val.to_big_endian(&mut buf[0..32]);
        buf[56..64].copy_from_slice(&self.age.to_be_bytes());
        let wat_bytes = self.wat.as_bytes();
        let n = wat_bytes.len().min(32);
        buf[64..64 + n].copy_from_slice(&wat_bytes[..n]);
        H256::from(keccak256(buf))
    }

    pub fn sign(&mut self, signer: &impl PriceSigner) -> Result<(), PriceError> {
        if self.val.is_zero() {
            return Err(PriceError::PriceNotSet);
        }
        let sig = signer.sign_hash(self.hash())?;
        self.v = sig.v as u8;
        sig.r.to_big_endian(&mut self.r);
        sig.s.to_big_endian(&mut self.s);
        Ok(())
    }

    /// Recover the feeder address from the stored signature and the
    /// recomputed hash. Does not need the signer: recovery is pure.
    pub fn recover(&self) -> Result<Address, PriceError> {
        let sig = Signature {
            r: U256::from_big_endian(&self.r),
            s: U256::from_big_endian(&self.s),
            v: self.v as u64,
        };
        sig.recover(self.hash()).map_err(|_| PriceError::SignatureMismatch)
    }
}

fn f64_to_u256(price: f64) -> U256 {
    if price == 0.0 {
        return U256::zero();
    }
    let scaled = (price * PRICE_MULTIPLIER).round();
    U256::from(scaled as u128)
}

fn u256_to_f64(val: U256) -> f64 {
    if val.is_zero() {
        return 0.0;
    }
    val.as_u128() as f64 / PRICE_MULTIPLIER
}

impl Serialize for SignedPrice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            wat: &'a str,
            val: String,
            age: u64,
            v: String,
            r: String,
            s: String,
        }
        Wire {
            wat: &self.wat,
            val: self.val.to_string(),
            age: self.age,
            v: format!("{:02x}", self.v),
            r: faster_hex::hex_string(&self.r),
            s: faster_hex::hex_string(&self.s),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SignedPrice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            wat: String,
            val: String,
            age: u64,
            v: String,
            r: String,
            s: String,
        }
        let wire = Wire::deserialize(deserializer)?;
        let val = U256::from_dec_str(&wire.val).map_err(serde::de::Error::custom)?;
        let v = u8::from_str_radix(&wire.v, 16).map_err(serde::de::Error::custom)?;
        let r = decode_hex32(&wire.r).map_err(serde::de::Error::custom)?;
        let s = decode_hex32(&wire.s).map_err(serde::de::Error::custom)?;
        Ok(SignedPrice {
            wat: wire.wat,
            val,
            age: wire.age,
            v,
            r,
            s,
        })
    }
}

/// Decode a 32-byte hex field, rejecting anything that isn't exactly 64 hex
/// characters rather than panicking — this runs on gossip- and
/// query-agent-supplied input, which is untrusted.
fn decode_hex32(field: &str) -> Result<[u8; 32], String> {
    if field.len() != 64 {
        return Err(format!(
            "expected 64 hex characters (32 bytes), got {}",
            field.len()
        ));
    }
    let mut out = [0u8; 32];
    faster_hex::hex_decode(field.as_bytes(), &mut out)
        .map_err(|err| format!("invalid hex: {err}"))?;
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_float64_price_round_trips() {
        for price in [2f64.powi(52), 1.0 / PRICE_MULTIPLIER, 0.0] {
            let mut p = SignedPrice::new("AAABBB", 0);
            p.set_float64_price(price);
            assert_eq!(p.float64_price(), price);
        }
    }

    #[test]
    fn sign_fails_without_a_price() {
        struct NullSigner;
        impl PriceSigner for NullSigner {
            fn address(&self) -> Address {
                Address::zero()
            }
            fn sign_hash(&self, _hash: H256) -> Result<Signature, PriceError> {
                unreachable!("should not be called before a price is set")
            }
        }
        let mut p = SignedPrice::new("AAABBB", 0);
        assert_eq!(p.sign(&NullSigner), Err(PriceError::PriceNotSet));
    }

    #[test]
    fn marshal_json_shape() {
        let mut p = SignedPrice::new("AAABBB", 1605371361);
        p.set_float64_price(42.0);
        p.v = 0xAA;
        p.r[0] = 0x01;
        p.s[0] = 0x02;

        let j = serde_json::to_value(&p).unwrap();
        assert_eq!(j["wat"], "AAABBB");
        assert_eq!(j["val"], "42000000000000000000");
        assert_eq!(j["age"], 1605371361);
        assert_eq!(j["v"], "aa");
        assert_eq!(
            j["r"],
            "0100000000000000000000000000000000000000000000000000000000000000"
        );
        assert_eq!(
            j["s"],
            "0200000000000000000000000000000000000000000000000000000000000000"
        );
    }

    /// Seed scenario 6: the hash of `wat="AAABBB"`, `price=42`,
    /// `age=1605371361` equals the fixed constant from the reference
    /// implementation's test fixture.
    #[test]
    fn hash_matches_fixed_test_vector() {
        let mut p = SignedPrice::new("AAABBB", 1605371361);
        p.set_float64_price(42.0);
        assert_eq!(
            format!("{:x}", p.hash()),
            "c678b27c20ef30b95452d8d61f8f3916899717692d8a01c595971035b25a00ff"
        );
    }

    /// Seed scenario 6: signing with a wallet and recovering from the
    /// stored signature returns that wallet's own address.
    #[test]
    fn sign_then_recover_returns_signer_address() {
        use ethers_signers::Signer;
        let wallet: ethers_signers::LocalWallet =
            "0000000000000000000000000000000000000000000000000000000000000001"
                .parse()
                .unwrap();

        let mut p = SignedPrice::new("AAABBB", 1605371361);
        p.set_float64_price(42.0);
        p.sign(&wallet).unwrap();

        assert_eq!(p.recover().unwrap(), wallet.address());
    }

    #[test]
    fn json_round_trips() {
        let mut p = SignedPrice::new("AAABBB", 1605371361);
        p.set_float64_price(42.0);
        p.v = 0xAA;
        p.r[0] = 0x01;
        p.s[0] = 0x02;

        let j = serde_json::to_string(&p).unwrap();
        let p2: SignedPrice = serde_json::from_str(&j).unwrap();
        assert_eq!(p, p2);
    }

    /// A short or odd-length `r`/`s` field is malformed input, not a crash.
    #[test]
    fn malformed_hex_field_is_rejected_not_panicked() {
        let j = r#"{"wat":"AAABBB","val":"1","age":0,"v":"00","r":"aa","s":"00"}"#;
        let result: Result<SignedPrice, _> = serde_json::from_str(j);
        assert!(result.is_err());
    }

    #[test]
    fn non_hex_field_is_rejected_not_panicked() {
        let j = r#"{"wat":"AAABBB","val":"1","age":0,"v":"00","r":"zz00000000000000000000000000000000000000000000000000000000000000","s":"0000000000000000000000000000000000000000000000000000000000000000"}"#;
        let result: Result<SignedPrice, _> = serde_json::from_str(j);
        assert!(result.is_err());
    }
}
