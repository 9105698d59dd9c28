// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! `mio::Token` allocation. The check slab and the client slab share one
//! `mio::Poll`, so their tokens must never collide; rather than tracking a
//! separate free-standing counter, a check's token is always even and a
//! client's always odd, both derived directly from the slab key they
//! index — which is also how the three-way dispatch classification
//! ("outbound socket in `CheckTable`" vs "listener" vs "client IPC fd") is
//! implemented: decoding a token tells you which slab to look in.

use mio::Token;

pub const LISTENER_TOKEN: Token = Token(0);
pub const SIGNAL_TOKEN: Token = Token(1);

pub enum TokenKind {
    Listener,
    Signal,
    Check(usize),
    Client(usize),
}

pub fn check_token(key: usize) -> Token {
    Token(2 * key + 2)
}

pub fn client_token(key: usize) -> Token {
    Token(2 * key + 3)
}

pub fn decode(token: Token) -> TokenKind {
    match token.0 {
        0 => TokenKind::Listener,
        1 => TokenKind::Signal,
        raw if raw % 2 == 0 => TokenKind::Check((raw - 2) / 2),
        raw => TokenKind::Client((raw - 3) / 2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_and_client_tokens_never_collide() {
        for key in 0..100usize {
            match decode(check_token(key)) {
                TokenKind::Check(k) => assert_eq!(k, key),
                _ => panic!("expected a Check token"),
            }
            match decode(client_token(key)) {
                TokenKind::Client(k) => assert_eq!(k, key),
                _ => panic!("expected a Client token"),
            }
            assert_ne!(check_token(key), client_token(key));
        }
    }

    #[test]
    fn reserved_tokens_decode_correctly() {
        assert!(matches!(decode(LISTENER_TOKEN), TokenKind::Listener));
        assert!(matches!(decode(SIGNAL_TOKEN), TokenKind::Signal));
    }
}
