use dyn_clone::DynClone;
use secp256k1::{rand::rngs::OsRng, KeyPair, Secp256k1, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use url::Url;

use std::{any::Any, fmt, fmt::Debug};

pub type MessageId = String;

#[typetag::serde(tag = "type")]
pub trait SerdeGenericTrait: DynClone + Debug + Send + Sync {
    fn any_ref(&self) -> &dyn Any;
}

dyn_clone::clone_trait_object!(SerdeGenericTrait);

impl dyn SerdeGenericTrait {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.any_ref().downcast_ref()
    }
}

/// A peer's addressable identity on the P2P network.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId {
    pub pubkey: XOnlyPublicKey,
    pub address: Url,
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.pubkey, self.address)
    }
}

/// Our own network identity together with the key material used to sign as it.
#[derive(Clone)]
pub struct Identity {
    network_id: NetworkId,
    secret_key: SecretKey,
}

impl Identity {
    pub fn new(secret_key: SecretKey, address: Url) -> Self {
        let secp = Secp256k1::new();
        let keypair = KeyPair::from_secret_key(&secp, &secret_key);
        let (pubkey, _) = keypair.x_only_public_key();
        Self {
            network_id: NetworkId { pubkey, address },
            secret_key,
        }
    }

    pub fn generate(address: Url) -> Self {
        let secp = Secp256k1::new();
        let (secret_key, _) = secp.generate_keypair(&mut OsRng);
        Self::new(secret_key, address)
    }

    pub fn network_id(&self) -> &NetworkId {
        &self.network_id
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }
}

impl Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("network_id", &self.network_id)
            .finish_non_exhaustive()
    }
}
