// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Helpers for the `fetch` v2 command.
//!
//! Negotiation and pack construction are delegated entirely to the local
//! `git upload-pack` subprocess (`store::Store::serve_upload_pack`); this
//! module only extracts the pieces of the request the dispatcher needs for
//! logging and metrics without re-implementing the negotiation state
//! machine.

/// Whether the client's `fetch` request body includes a `done` line, i.e.
/// this is a final round that expects a packfile back rather than another
/// round of have/ack negotiation. Used only to label metrics; `git
/// upload-pack` makes the real decision.
pub fn is_final_round(body: &[u8]) -> bool {
    body.windows(b"done\n".len()).any(|w| w == b"done\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_done_line() {
        let body = b"0011command=fetch0001000dthin-pack0009done\n0000";
        assert!(is_final_round(body));
    }

    #[test]
    fn negotiation_round_without_done_is_not_final() {
        let body = b"0011command=fetch0001000dthin-pack0032have aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n0000";
        assert!(!is_final_round(body));
    }
}
