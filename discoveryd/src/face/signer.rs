use sha2::{Digest, Sha256};
use super::Data;

/// Signing hook applied to every data packet a session serves, and checked on
/// every packet it fetches.
pub trait DataSigner: Send + Sync + 'static {
    fn sign(&self, data: &mut Data);

    fn verify(&self, data: &Data) -> bool;
}

/// SHA-256 digest over name and content. Integrity only, no authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestSha256;

impl DigestSha256 {
    fn digest(data: &Data) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(data.name.to_uri().as_bytes());
        hasher.update([0u8]);
        hasher.update(&data.content);
        hasher.finalize().to_vec()
    }
}

impl DataSigner for DigestSha256 {
    fn sign(&self, data: &mut Data) {
        data.signature = Self::digest(data);
    }

    fn verify(&self, data: &Data) -> bool {
        let ok = data.signature == Self::digest(data);
        if !ok {
            tracing::debug!(
                "Digest mismatch for {}: got {}",
                data.name,
                hex::encode(&data.signature)
            );
        }
        ok
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoSigning;

impl DataSigner for NoSigning {
    fn sign(&self, data: &mut Data) {
        data.signature.clear();
    }

    fn verify(&self, _data: &Data) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::Name;

    #[test]
    fn test_digest_detects_tampering() {
        let mut data = Data::new(Name::parse("/node-A/printer1/NDNSD/service-info/1"), b"record".to_vec());
        DigestSha256.sign(&mut data);
        assert_eq!(data.signature.len(), 32);
        assert!(DigestSha256.verify(&data));

        data.content.push(0);
        assert!(!DigestSha256.verify(&data));
    }

    #[test]
    fn test_digest_covers_name() {
        let mut data = Data::new(Name::parse("/a/1"), b"x".to_vec());
        DigestSha256.sign(&mut data);
        data.name = Name::parse("/a/2");
        assert!(!DigestSha256.verify(&data));
    }

    #[test]
    fn test_unsigned_data_rejected_by_digest() {
        let mut data = Data::new(Name::parse("/a/1"), b"x".to_vec());
        NoSigning.sign(&mut data);
        assert!(NoSigning.verify(&data));
        assert!(!DigestSha256.verify(&data));
    }
}
