//! Quirk matching score (spec.md §4.4 / property P8).
//!
//! VID and PID are mandatory (4 pts each); `bcdDevice` (3 pts) and the
//! interface triplet are optional boosts. Any *specified* field that doesn't
//! match disqualifies the entry outright. Highest score wins; ties keep
//! document order (first entry in the list wins).

use crate::types::DeviceFingerprint;

use super::QuirkEntry;

pub fn score(entry: &QuirkEntry, fp: &DeviceFingerprint) -> Option<u32> {
    let m = &entry.match_descriptor;
    if m.vid != fp.vid || m.pid != fp.pid {
        return None;
    }
    let mut score = 4 + 4;

    if let Some(bcd) = m.bcd_device {
        match fp.bcd_device {
            Some(fp_bcd) if fp_bcd == bcd => score += 3,
            _ => return None,
        }
    }

    if let Some(iface) = &m.iface {
        if let Some(class) = iface.class {
            if class != fp.interface_class {
                return None;
            }
            score += 2;
        }
        if let Some(subclass) = iface.subclass {
            if subclass != fp.interface_subclass {
                return None;
            }
            score += 2;
        }
        if let Some(protocol) = iface.protocol {
            if protocol != fp.interface_protocol {
                return None;
            }
            score += 2;
        }
    }

    Some(score)
}

pub fn best_match<'a>(entries: &'a [QuirkEntry], fp: &DeviceFingerprint) -> Option<&'a QuirkEntry> {
    let mut best: Option<(u32, &QuirkEntry)> = None;
    for entry in entries {
        let Some(s) = score(entry, fp) else { continue };
        match &best {
            Some((best_score, _)) if s <= *best_score => {}
            _ => best = Some((s, entry)),
        }
    }
    best.map(|(_, e)| e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quirks::{IfaceMatch, MatchDescriptor, OpsOverrides, QuirkEntry, TuningOverrides};

    fn fp() -> DeviceFingerprint {
        DeviceFingerprint {
            vid: 0x18d1,
            pid: 0x4ee1,
            interface_class: 6,
            interface_subclass: 1,
            interface_protocol: 1,
            endpoint_signature: 0x81_01_82,
            bcd_device: None,
        }
    }

    fn entry(id: &str, iface: Option<IfaceMatch>) -> QuirkEntry {
        QuirkEntry {
            id: id.to_string(),
            match_descriptor: MatchDescriptor {
                vid: 0x18d1,
                pid: 0x4ee1,
                bcd_device: None,
                iface,
            },
            tuning: TuningOverrides::default(),
            ops: OpsOverrides::default(),
            hooks: Vec::new(),
            status: None,
            confidence: None,
        }
    }

    #[test]
    fn mismatched_vid_disqualifies() {
        let mut e = entry("x", None);
        e.match_descriptor.vid = 0x1234;
        assert_eq!(matcher_score(&e, &fp()), None);
    }

    fn matcher_score(e: &QuirkEntry, fp: &DeviceFingerprint) -> Option<u32> {
        score(e, fp)
    }

    #[test]
    fn base_vid_pid_match_scores_eight() {
        let e = entry("base", None);
        assert_eq!(score(&e, &fp()), Some(8));
    }

    #[test]
    fn interface_triplet_adds_six() {
        let e = entry(
            "full",
            Some(IfaceMatch {
                class: Some(6),
                subclass: Some(1),
                protocol: Some(1),
            }),
        );
        assert_eq!(score(&e, &fp()), Some(8 + 6));
    }

    #[test]
    fn mismatched_interface_field_disqualifies() {
        let e = entry(
            "bad-iface",
            Some(IfaceMatch {
                class: Some(99),
                subclass: None,
                protocol: None,
            }),
        );
        assert_eq!(score(&e, &fp()), None);
    }

    #[test]
    fn matching_bcd_device_adds_three() {
        let mut e = entry("bcd", None);
        e.match_descriptor.bcd_device = Some(0x0100);
        let mut device = fp();
        device.bcd_device = Some(0x0100);
        assert_eq!(score(&e, &device), Some(8 + 3));
    }

    #[test]
    fn mismatched_bcd_device_disqualifies() {
        let mut e = entry("bcd", None);
        e.match_descriptor.bcd_device = Some(0x0100);
        let mut device = fp();
        device.bcd_device = Some(0x0200);
        assert_eq!(score(&e, &device), None);
    }

    #[test]
    fn specified_bcd_device_disqualifies_when_fingerprint_has_none() {
        let mut e = entry("bcd", None);
        e.match_descriptor.bcd_device = Some(0x0100);
        assert_eq!(score(&e, &fp()), None);
    }

    #[test]
    fn highest_score_wins_ties_broken_by_document_order() {
        let low = entry("low", None);
        let high = entry(
            "high",
            Some(IfaceMatch {
                class: Some(6),
                subclass: None,
                protocol: None,
            }),
        );
        let tie_a = entry("tie-a", None);
        let tie_b = entry("tie-b", None);

        assert_eq!(best_match(&[low.clone(), high.clone()], &fp()).unwrap().id, "high");
        assert_eq!(best_match(&[tie_a, tie_b], &fp()).unwrap().id, "tie-a");
    }
}
