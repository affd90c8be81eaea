use crate::{errors::MirrorError, keystore::crypto::EncryptedBlob};
use bip39::{Language, Mnemonic};
use bitcoin::{
    bech32::{self, Bech32, Hrp},
    bip32::{DerivationPath, Xpriv},
    hashes::{hash160, Hash as _},
    secp256k1::{PublicKey, Secp256k1, SecretKey},
    Network,
};
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub const CREDENTIAL_VERSION: u32 = 1;

/// BIP44 coin type for current Terra accounts.
pub const COIN_TYPE_TERRA: u32 = 330;
/// Coin type used by wallets created before the Terra-specific one was registered.
pub const COIN_TYPE_LEGACY: u32 = 118;

/// The single persisted wallet record. `address` is public; only `encrypted_key` is secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletCredential {
    #[serde(default)]
    pub version: u32,
    pub address: String,
    pub encrypted_key: EncryptedBlob,
}

/// Parse a hex private key, with or without a lowercase `0x` prefix. Anything other than
/// exactly 64 hex characters is `InvalidKeyFormat`; surrounding whitespace is not stripped.
pub fn parse_private_key_hex(input: &str) -> Result<Zeroizing<[u8; 32]>, MirrorError> {
    let body = input.strip_prefix("0x").unwrap_or(input);
    if body.len() != 64 {
        return Err(MirrorError::InvalidKeyFormat);
    }
    let mut out = Zeroizing::new([0_u8; 32]);
    if hex::decode_to_slice(body, out.as_mut_slice()).is_err() {
        return Err(MirrorError::InvalidKeyFormat);
    }
    Ok(out)
}

/// Bech32 account address: `hrp` + hash160 of the compressed secp256k1 public key.
pub fn address_from_private_key(key: &[u8; 32], hrp: &str) -> eyre::Result<String> {
    let secp = Secp256k1::signing_only();
    // Zero and out-of-range scalars are not valid keys even though they are well-formed hex.
    let Ok(sk) = SecretKey::from_slice(key) else {
        return Err(MirrorError::InvalidKeyFormat.into());
    };
    let pk = PublicKey::from_secret_key(&secp, &sk);
    let h = hash160::Hash::hash(&pk.serialize());

    let hrp = Hrp::parse(hrp).with_context(|| format!("invalid address prefix {hrp:?}"))?;
    bech32::encode::<Bech32>(hrp, h.as_byte_array()).context("bech32 encode address")
}

/// Generate a fresh 24-word English phrase.
pub fn generate_mnemonic() -> eyre::Result<Zeroizing<String>> {
    let mnemonic = Mnemonic::generate_in(Language::English, 24).context("generate mnemonic")?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Recover the first account key, `m/44'/{coin_type}'/0'/0/0`, from a BIP39 phrase.
pub fn private_key_from_mnemonic(
    phrase: &str,
    coin_type: u32,
) -> eyre::Result<Zeroizing<[u8; 32]>> {
    let mnemonic =
        Mnemonic::parse_in_normalized(Language::English, phrase).context("parse mnemonic")?;
    let seed = Zeroizing::new(mnemonic.to_seed_normalized(""));
    let secp = Secp256k1::new();
    let master = Xpriv::new_master(Network::Bitcoin, seed.as_slice()).context("master xpriv")?;

    let path: DerivationPath = format!("m/44'/{coin_type}'/0'/0/0")
        .parse()
        .context("parse derivation path")?;
    let child = master
        .derive_priv(&secp, &path)
        .context("derive account key")?;
    Ok(Zeroizing::new(child.private_key.secret_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon \
                                 abandon abandon abandon abandon abandon about";

    #[test]
    fn hex_key_accepts_optional_prefix() -> eyre::Result<()> {
        let body = "d1f2".repeat(16);
        let plain = parse_private_key_hex(&body)?;
        let prefixed = parse_private_key_hex(&format!("0x{body}"))?;
        assert_eq!(*plain, *prefixed);
        assert_eq!(plain.first(), Some(&0xd1));
        Ok(())
    }

    #[test]
    fn hex_key_rejects_wrong_length_and_non_hex() {
        let bad_inputs = [
            String::new(),
            "0x".to_owned(),
            "ab".repeat(31),
            "ab".repeat(33),
            "zz".repeat(32),
            format!("0x{}", "ab".repeat(31)),
            format!("0X{}", "ab".repeat(32)),
            format!(" {}", "ab".repeat(32)),
            format!("{}\n", "ab".repeat(32)),
        ];
        for bad in &bad_inputs {
            assert_eq!(
                parse_private_key_hex(bad).err(),
                Some(MirrorError::InvalidKeyFormat),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn address_uses_hash160_of_compressed_pubkey() -> eyre::Result<()> {
        let mut key = [0_u8; 32];
        key[31] = 1;
        // hash160(G) = 751e76e8199196d454941c45d1b3a323f1433bd6
        assert_eq!(
            address_from_private_key(&key, "terra")?,
            "terra1w508d6qejxtdg4y5r3zarvary0c5xw7kued6dc"
        );
        Ok(())
    }

    #[test]
    fn zero_key_is_rejected() {
        let err = address_from_private_key(&[0_u8; 32], "terra").err();
        assert!(err.is_some_and(|e| matches!(
            crate::errors::mirror_error(&e),
            Some(MirrorError::InvalidKeyFormat)
        )));
    }

    #[test]
    fn mnemonic_recovery_matches_known_terra_account() -> eyre::Result<()> {
        let key = private_key_from_mnemonic(ABANDON_ABOUT, COIN_TYPE_TERRA)?;
        assert_eq!(
            hex::encode(*key),
            "05be413bb5bd1fb67757251976dd43adf0d4db27d1a5444b4f6ef754ef939b10"
        );
        assert_eq!(
            address_from_private_key(&key, "terra")?,
            "terra1amdttz2937a3dytmxmkany53pp6ma6dy4vsllv"
        );

        let legacy = private_key_from_mnemonic(ABANDON_ABOUT, COIN_TYPE_LEGACY)?;
        assert_ne!(*key, *legacy);
        Ok(())
    }

    #[test]
    fn generated_mnemonic_has_24_words_and_recovers() -> eyre::Result<()> {
        let phrase = generate_mnemonic()?;
        assert_eq!(phrase.split_whitespace().count(), 24);
        let key = private_key_from_mnemonic(&phrase, COIN_TYPE_TERRA)?;
        assert!(address_from_private_key(&key, "terra")?.starts_with("terra1"));
        Ok(())
    }
}
