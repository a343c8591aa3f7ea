use crate::crypto::ChannelCipher;
use crate::message::Message;
use crate::AquaProtocolError;

/// Turns [`Message`]s into datagrams and back.
///
/// Plain codecs emit bare MessagePack. Sealed codecs wrap every datagram
/// in a [`crate::crypto::SealedFrame`]; peers on one ring must agree.
#[derive(Debug, Clone, Default)]
pub struct WireCodec {
    cipher: Option<ChannelCipher>,
}

impl WireCodec {
    pub fn plain() -> Self {
        Self { cipher: None }
    }

    pub fn sealed(cipher: ChannelCipher) -> Self {
        Self {
            cipher: Some(cipher),
        }
    }

    /// Sealed when a secret is given, plain otherwise.
    pub fn from_secret(secret: Option<&str>) -> Result<Self, AquaProtocolError> {
        match secret {
            Some(s) => Ok(Self::sealed(ChannelCipher::from_passphrase(s)?)),
            None => Ok(Self::plain()),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, AquaProtocolError> {
        let bytes = message.to_bytes()?;
        match &self.cipher {
            Some(cipher) => cipher.seal(&bytes),
            None => Ok(bytes),
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<Message, AquaProtocolError> {
        match &self.cipher {
            Some(cipher) => Message::from_bytes(&cipher.open(data)?),
            None => Message::from_bytes(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerId;

    #[test]
    fn plain_roundtrip() {
        let codec = WireCodec::plain();
        let msg = Message::DeregisterRequest {
            id: PeerId::from_counter(4),
        };
        assert_eq!(codec.decode(&codec.encode(&msg).unwrap()).unwrap(), msg);
        assert!(!codec.is_sealed());
    }

    #[test]
    fn sealed_roundtrip() {
        let codec = WireCodec::from_secret(Some("reef")).unwrap();
        assert!(codec.is_sealed());
        let bytes = codec.encode(&Message::Token).unwrap();
        assert_ne!(bytes, Message::Token.to_bytes().unwrap());
        assert_eq!(codec.decode(&bytes).unwrap(), Message::Token);
    }

    #[test]
    fn sealed_peer_rejects_plain_datagram() {
        let sealed = WireCodec::from_secret(Some("reef")).unwrap();
        let plain = WireCodec::plain().encode(&Message::Token).unwrap();
        assert!(sealed.decode(&plain).is_err());
    }
}
