//! Gateway request signing
//!
//! Parameters are canonicalised as `key=value` pairs sorted by key,
//! form-urlencoded and joined by `&`. Signatures are upper-case hex HMACs of
//! that string; verification decodes the hex and compares in constant time.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha256,
    Sha512,
}

pub type Params = BTreeMap<String, String>;

/// Sorted, form-urlencoded `k=v&k=v`. Empty values are skipped.
pub fn canonicalize(params: &Params) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().filter(|(_, v)| !v.is_empty()))
        .finish()
}

fn mac_bytes(algo: HashAlgo, secret: &str, data: &[u8]) -> Vec<u8> {
    match algo {
        HashAlgo::Sha256 => {
            // HMAC accepts keys of any length
            let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
                return Vec::new();
            };
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgo::Sha512 => {
            let Ok(mut mac) = Hmac::<Sha512>::new_from_slice(secret.as_bytes()) else {
                return Vec::new();
            };
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// Upper-case hex signature of the canonical form
pub fn sign(params: &Params, secret: &str, algo: HashAlgo) -> String {
    hex::encode_upper(mac_bytes(algo, secret, canonicalize(params).as_bytes()))
}

/// Constant-time check of a hex signature (either case)
pub fn verify(params: &Params, secret: &str, algo: HashAlgo, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let data = canonicalize(params);
    match algo {
        HashAlgo::Sha256 => Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map(|mut mac| {
                mac.update(data.as_bytes());
                mac.verify_slice(&expected).is_ok()
            })
            .unwrap_or(false),
        HashAlgo::Sha512 => Hmac::<Sha512>::new_from_slice(secret.as_bytes())
            .map(|mut mac| {
                mac.update(data.as_bytes());
                mac.verify_slice(&expected).is_ok()
            })
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn canonical_form_is_sorted_and_encoded() {
        let p = params(&[("b", "x y"), ("a", "1&2"), ("c", "")]);
        assert_eq!(canonicalize(&p), "a=1%262&b=x+y");
    }

    #[test]
    fn hmac_sha256_matches_known_vector() {
        // RFC 4231 test case 2
        let mut mac = Hmac::<Sha256>::new_from_slice(b"Jefe").unwrap();
        mac.update(b"what do ya want for nothing?");
        let expected = hex::encode_upper(mac.finalize().into_bytes());
        assert_eq!(
            expected,
            "5BDCC146BF60754E6A042426089575C75A003F089D2739839DEC58B964EC3843"
        );
        assert_eq!(
            hex::encode_upper(mac_bytes(HashAlgo::Sha256, "Jefe", b"what do ya want for nothing?")),
            expected
        );
    }

    #[test]
    fn sign_then_verify() {
        let p = params(&[("vnp_Amount", "1000000"), ("vnp_TxnRef", "abc")]);
        for algo in [HashAlgo::Sha256, HashAlgo::Sha512] {
            let sig = sign(&p, "secret", algo);
            assert_eq!(sig, sig.to_uppercase());
            assert!(verify(&p, "secret", algo, &sig));
            assert!(verify(&p, "secret", algo, &sig.to_lowercase()));
            assert!(!verify(&p, "other", algo, &sig));
        }
    }

    #[test]
    fn tampered_params_fail_verification() {
        let mut p = params(&[("amount", "100"), ("ref", "r1")]);
        let sig = sign(&p, "k", HashAlgo::Sha512);
        p.insert("amount".into(), "1".into());
        assert!(!verify(&p, "k", HashAlgo::Sha512, &sig));
        assert!(!verify(&p, "k", HashAlgo::Sha512, "not-hex"));
    }
}
