use std::net::SocketAddr;

use bertwise_protocol::{Request, Token};

/// Identity of one blockwise transfer.
///
/// A transfer is keyed by the peer endpoint, the token, and the request
/// URI (path and query). The key is computed from the first message of a
/// transfer and reused verbatim for every later block, so all blocks of
/// one logical body land on the same tracker.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransferKey {
    peer: SocketAddr,
    token: Token,
    uri_path: String,
    uri_query: String,
}

impl TransferKey {
    /// Builds the key for a transfer anchored at `request`, exchanged with
    /// `peer`.
    pub fn new(peer: SocketAddr, request: &Request) -> Self {
        Self {
            peer,
            token: request.token().clone(),
            uri_path: request.options().uri_path_joined(),
            uri_query: request.options().uri_query_joined(),
        }
    }

    /// The peer endpoint of the transfer.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use bertwise_protocol::Code;

    use super::*;

    fn request(path: &str, token: &[u8]) -> Request {
        let mut request = Request::new(Code::Get);
        request.options_mut().set_uri_path(path);
        request.set_token(Token::new(token.to_vec()));
        request
    }

    #[test]
    fn test_same_transfer_same_key() {
        let peer: SocketAddr = "10.0.0.1:5683".parse().unwrap();
        let a = TransferKey::new(peer, &request("/res/a", &[1, 2]));
        let b = TransferKey::new(peer, &request("res/a", &[1, 2]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_token_distinct_key() {
        let peer: SocketAddr = "10.0.0.1:5683".parse().unwrap();
        let a = TransferKey::new(peer, &request("/res/a", &[1]));
        let b = TransferKey::new(peer, &request("/res/a", &[2]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_distinct_peer_distinct_key() {
        let request = request("/res/a", &[1]);
        let a = TransferKey::new("10.0.0.1:5683".parse().unwrap(), &request);
        let b = TransferKey::new("10.0.0.2:5683".parse().unwrap(), &request);
        assert_ne!(a, b);
    }
}
