use rustls::crypto::CryptoProvider;
use sslc_common::protocol::ResultCode;

use crate::fault::Fault;

/// Forwards random-data requests to the crypto provider's generator
#[derive(Debug)]
pub struct RandomBridge {
    max_request: u32,
    seeded:      bool,
}

impl RandomBridge {
    pub fn new(max_request: u32) -> Self {
        Self {
            max_request,
            seeded: false,
        }
    }

    /// The provider reseeds itself; this only records that a seed was asked
    /// for
    pub fn seed(&mut self) {
        if !self.seeded {
            tracing::debug!("Random generator seed requested");
        }
        self.seeded = true;
    }

    pub fn generate(&self, provider: &CryptoProvider, size: u32) -> Result<Vec<u8>, Fault> {
        if size > self.max_request {
            return Err(Fault::new(
                ResultCode::RequestTooLarge,
                format!(
                    "requested {size} random bytes, limit is {}",
                    self.max_request
                ),
            ));
        }

        let mut buf = vec![0u8; size as usize];
        if !buf.is_empty() {
            provider
                .secure_random
                .fill(&mut buf)
                .map_err(|_| Fault::new(ResultCode::Internal, "random generator failure"))?;
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_over_the_ceiling_are_rejected() {
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        let bridge = RandomBridge::new(32);
        assert_eq!(
            bridge.generate(&provider, 33).unwrap_err().code,
            ResultCode::RequestTooLarge
        );
        assert_eq!(bridge.generate(&provider, 32).unwrap().len(), 32);
        assert!(bridge.generate(&provider, 0).unwrap().is_empty());
    }

    #[test]
    fn generated_blocks_differ() {
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        let mut bridge = RandomBridge::new(64);
        bridge.seed();
        let a = bridge.generate(&provider, 32).unwrap();
        let b = bridge.generate(&provider, 32).unwrap();
        assert_ne!(a, b);
    }
}
