//! Size-budget helpers used by emitters that must paginate (MOTD, WHOIS,
//! ACL list).

use crate::frame::{KVal, MAXFRAME, MAXTARGET};

/// Estimate the binary-dialect encoded length of a frame with the given
/// `command` and `kval`, assuming `source` and `target` each occupy their
/// maximum allowed length.
///
/// Mirrors the accounting a real `binary::encode` call performs: a leading
/// separator, three `\0`-terminated header fields, one `\0`-terminated pair
/// per kval value, and a trailing terminator.
fn estimate_len(command: &str, kval: &KVal) -> usize {
    let mut len = 2; // length prefix
    len += 1; // leading separator
    len += MAXTARGET + 1; // source
    len += MAXTARGET + 1; // target
    len += command.len() + 1; // command
    for (key, values) in kval {
        for value in values {
            len += key.len() + 1 + value.len() + 1;
        }
    }
    len += 1; // trailing terminator
    len
}

/// Maximum byte budget remaining for additional payload on a frame carrying
/// `command` and the given partial `kval`.
#[must_use]
pub fn fit(command: &str, kval: &KVal) -> usize {
    MAXFRAME.saturating_sub(estimate_len(command, kval))
}

/// Split `base`'s values under `paging_keys` across as many frames as
/// needed to stay within budget, repeating every other key in each part.
///
/// `paging_keys` must name "parallel" lists (e.g. `acl`/`acl-time`/
/// `acl-setter`): all are sliced at the same row boundaries. Each returned
/// part carries `multipart=*`, `part=<i>`, `total=<n>`.
#[must_use]
pub fn paginate(command: &str, base: &KVal, paging_keys: &[&str]) -> Vec<KVal> {
    let total_rows =
        paging_keys.iter().filter_map(|k| base.get(*k)).map(Vec::len).max().unwrap_or(0);

    if total_rows == 0 {
        return vec![base.clone()];
    }

    let mut fixed = base.clone();
    for key in paging_keys {
        fixed.remove(*key);
    }
    fixed.insert("multipart".to_string(), vec!["*".to_string()]);
    fixed.insert("part".to_string(), vec!["0".to_string()]);
    fixed.insert("total".to_string(), vec!["0".to_string()]);
    let budget = fit(command, &fixed);

    let per_row_cost = paging_keys
        .iter()
        .filter_map(|k| base.get(*k))
        .flat_map(|values| values.iter())
        .map(|v| v.len() + 2)
        .max()
        .unwrap_or(1)
        .max(1);
    let rows_per_part = (budget / per_row_cost).max(1);

    let mut parts = Vec::new();
    let mut row = 0;
    while row < total_rows {
        let end = (row + rows_per_part).min(total_rows);
        let mut part = fixed.clone();
        for key in paging_keys {
            if let Some(values) = base.get(*key) {
                let lo = row.min(values.len());
                let hi = end.min(values.len());
                part.insert((*key).to_string(), values[lo..hi].to_vec());
            }
        }
        parts.push(part);
        row = end;
    }

    let total_parts = parts.len();
    for (i, part) in parts.iter_mut().enumerate() {
        part.insert("part".to_string(), vec![(i + 1).to_string()]);
        part.insert("total".to_string(), vec![total_parts.to_string()]);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_shrinks_as_kval_grows() {
        let empty = KVal::new();
        let mut loaded = KVal::new();
        loaded.insert("text".to_string(), vec!["x".repeat(500)]);
        assert!(fit("motd", &loaded) < fit("motd", &empty));
    }

    #[test]
    fn paginate_returns_single_part_when_nothing_to_page() {
        let mut kval = KVal::new();
        kval.insert("handle".to_string(), vec!["alice".to_string()]);
        let parts = paginate("whois", &kval, &["acl"]);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0], kval);
    }

    #[test]
    fn paginate_splits_large_lists_and_numbers_parts() {
        let mut kval = KVal::new();
        let lines: Vec<String> = (0..500).map(|i| format!("line {i}")).collect();
        kval.insert("text".to_string(), lines.clone());

        let parts = paginate("motd", &kval, &["text"]);
        assert!(parts.len() > 1, "expected pagination to kick in");

        let mut reassembled = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.get("part"), Some(&vec![(i + 1).to_string()]));
            assert_eq!(part.get("total"), Some(&vec![parts.len().to_string()]));
            reassembled.extend(part.get("text").cloned().unwrap_or_default());
        }
        assert_eq!(reassembled, lines);
    }
}
