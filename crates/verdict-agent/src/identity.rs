//! Actor identities: a private key, its address, and the DID the rest of
//! the system refers to it by.

use verdict_core::{Address, Did, VerdictError};
use verdict_protocol::address_from_private_key;

#[derive(Clone)]
pub struct ActorIdentity {
    pub private_key: String,
    pub address: Address,
    pub did: Did,
}

impl ActorIdentity {
    pub fn from_key(private_key: &str) -> Result<Self, VerdictError> {
        let address = address_from_private_key(private_key)?;
        Ok(Self {
            private_key: private_key.to_string(),
            address,
            did: Did::from_address(address),
        })
    }
}

impl std::fmt::Debug for ActorIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActorIdentity({})", self.did)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_derives_did_from_key() {
        let key = "0x1111111111111111111111111111111111111111111111111111111111111111";
        let actor = ActorIdentity::from_key(key).unwrap();
        assert!(actor.did.to_string().starts_with("did:8004:0x"));
        assert_eq!(actor.did.address(), actor.address);
    }
}
