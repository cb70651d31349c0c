// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! The `ls-refs` v2 command: list refs, optionally filtered by prefix.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    pktline::Frame,
    store::{RefAdvertisement, SymrefTarget},
};

/// Parsed arguments of an `ls-refs` command request (the lines between
/// `command=ls-refs` and the closing flush, minus the delim that separates
/// capabilities from arguments in the general v2 framing).
#[derive(Debug, Default, Clone)]
pub struct LsRefsArgs {
    pub ref_prefixes: Vec<String>,
    pub symrefs: bool,
    pub peel: bool,
}

impl LsRefsArgs {
    pub fn parse(lines: &[Bytes]) -> Self {
        let mut args = LsRefsArgs::default();
        for line in lines {
            let Ok(s) = std::str::from_utf8(line) else { continue };
            let s = s.trim_end_matches('\n');
            if let Some(prefix) = s.strip_prefix("ref-prefix ") {
                args.ref_prefixes.push(prefix.to_string());
            } else if s == "symrefs" {
                args.symrefs = true;
            } else if s == "peel" {
                args.peel = true;
            }
        }
        args
    }

    fn matches(&self, name: &str) -> bool {
        self.ref_prefixes.is_empty() || self.ref_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

/// Render the `ls-refs` response as a sequence of pkt-line frames, ending
/// with a flush.
pub fn render(
    refs: &[RefAdvertisement],
    head_symref: Option<&SymrefTarget>,
    args: &LsRefsArgs,
) -> Vec<Frame> {
    let mut frames = Vec::new();

    for r in refs {
        if !args.matches(&r.name) {
            continue;
        }
        let mut line = BytesMut::new();
        line.put_slice(r.oid.to_string().as_bytes());
        line.put_u8(b' ');
        line.put_slice(r.name.as_bytes());
        if args.symrefs && r.name == "HEAD" {
            if let Some(target) = head_symref {
                line.put_slice(format!(" symref-target={}", target.target).as_bytes());
            }
        }
        if args.peel {
            if let Some(peeled) = r.peeled {
                line.put_slice(format!(" peeled:{peeled}").as_bytes());
            }
        }
        line.put_u8(b'\n');
        frames.push(Frame::data(line.freeze()));
    }

    frames.push(Frame::flush());
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::Oid;

    fn r(name: &str) -> RefAdvertisement {
        RefAdvertisement {
            name: name.to_string(),
            oid: Oid::zero(),
            peeled: None,
        }
    }

    #[test]
    fn parses_ref_prefix_symrefs_and_peel() {
        let lines = vec![
            Bytes::from_static(b"ref-prefix refs/heads/\n"),
            Bytes::from_static(b"symrefs\n"),
            Bytes::from_static(b"peel\n"),
        ];
        let args = LsRefsArgs::parse(&lines);
        assert_eq!(args.ref_prefixes, vec!["refs/heads/".to_string()]);
        assert!(args.symrefs);
        assert!(args.peel);
    }

    #[test]
    fn filters_by_ref_prefix() {
        let refs = vec![r("refs/heads/main"), r("refs/tags/v1")];
        let args = LsRefsArgs {
            ref_prefixes: vec!["refs/heads/".into()],
            ..Default::default()
        };
        let frames = render(&refs, None, &args);
        assert_eq!(frames.len(), 2); // one data frame + flush
    }

    #[test]
    fn symref_target_uses_equals_separator() {
        let refs = vec![r("HEAD")];
        let args = LsRefsArgs {
            symrefs: true,
            ..Default::default()
        };
        let target = SymrefTarget {
            name: "HEAD".to_string(),
            target: "refs/heads/main".to_string(),
        };
        let frames = render(&refs, Some(&target), &args);
        let text = String::from_utf8_lossy(&frames[0].bytes);
        assert!(text.contains("symref-target=refs/heads/main"));
    }

    #[test]
    fn no_prefixes_returns_everything() {
        let refs = vec![r("refs/heads/main"), r("refs/tags/v1")];
        let frames = render(&refs, None, &LsRefsArgs::default());
        assert_eq!(frames.len(), 3);
        assert!(frames.last().unwrap().is_sentinel());
    }
}
