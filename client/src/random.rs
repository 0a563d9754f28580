use sslc_common::protocol::{Command, Reply};

use crate::{service::unexpected, Result, ServiceConnection};

impl ServiceConnection {
    /// Ask the service to seed its random generator.
    pub fn seed_rng(&self) -> Result<()> {
        self.call_ack(Command::SeedRng)
    }

    /// Fetch `len` random bytes from the service.
    pub fn generate_random_data(&self, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }

        let size = u32::try_from(len).unwrap_or(u32::MAX);
        match self.call(Command::GenerateRandomData { size })? {
            Reply::RandomData(bytes) => Ok(bytes),
            other => Err(unexpected("GenerateRandomData", &other)),
        }
    }
}
