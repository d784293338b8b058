//! Standard UICC file profile
//!
//! Seeds a [`FileSystem`] with the files every UICC is expected to carry:
//! the MF-level EFs, DF.TELECOM and DF.GSM with their classic contents, and
//! the USIM/ISIM application DFs. Files a specific card carries beyond this
//! set are discovered at SELECT time.

use once_cell::sync::Lazy;

use super::{FileSystem, FsError, NodeSpec};

/// Well-known application identifier prefixes (ETSI TS 101 220 annex E).
/// The registered part is 7 bytes; cards append issuer-specific bytes.
pub static KNOWN_AIDS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("ADF.USIM", "a0000000871002"),
        ("ADF.ISIM", "a0000000871004"),
    ]
});

/// Look up the application name for an AID, by registered-prefix match.
pub fn app_name_for_aid(aid: &[u8]) -> Option<&'static str> {
    let hex_aid = hex::encode(aid);
    KNOWN_AIDS
        .iter()
        .find(|(_, prefix)| hex_aid.starts_with(prefix))
        .map(|(name, _)| *name)
}

/// Build a tree pre-populated with the standard profile.
pub fn standard() -> FileSystem {
    // The static profile cannot violate the tree invariants.
    build().unwrap_or_else(|e| panic!("standard profile is inconsistent: {e}"))
}

fn build() -> Result<FileSystem, FsError> {
    let mut fs = FileSystem::new();
    let mf = fs.mf();

    fs.add_child(mf, NodeSpec::ef(0x2F00, "EF.DIR").with_desc("Application directory"))?;
    fs.add_child(
        mf,
        NodeSpec::ef(0x2FE2, "EF.ICCID")
            .with_sfi(0x02)
            .with_desc("ICC identification"),
    )?;
    fs.add_child(
        mf,
        NodeSpec::ef(0x2F05, "EF.PL")
            .with_sfi(0x05)
            .with_desc("Preferred languages"),
    )?;

    let telecom = fs.add_child(mf, NodeSpec::df(0x7F10, "DF.TELECOM"))?;
    fs.add_child(telecom, NodeSpec::ef(0x6F3A, "EF.ADN").with_desc("Abbreviated dialling numbers"))?;
    fs.add_child(telecom, NodeSpec::ef(0x6F3B, "EF.FDN").with_desc("Fixed dialling numbers"))?;
    fs.add_child(telecom, NodeSpec::ef(0x6F3C, "EF.SMS").with_desc("Short messages"))?;
    fs.add_child(telecom, NodeSpec::ef(0x6F40, "EF.MSISDN").with_desc("Own numbers"))?;
    fs.add_child(telecom, NodeSpec::ef(0x6F42, "EF.SMSP").with_desc("SMS parameters"))?;

    let gsm = fs.add_child(mf, NodeSpec::df(0x7F20, "DF.GSM"))?;
    fs.add_child(gsm, NodeSpec::ef(0x6F07, "EF.IMSI").with_desc("IMSI"))?;
    fs.add_child(gsm, NodeSpec::ef(0x6F31, "EF.HPPLMN").with_desc("HPLMN search period"))?;
    fs.add_child(gsm, NodeSpec::ef(0x6F39, "EF.ACM").with_desc("Accumulated call meter"))?;
    fs.add_child(gsm, NodeSpec::ef(0x6F38, "EF.SST").with_desc("SIM service table"))?;
    fs.add_child(gsm, NodeSpec::ef(0x6F46, "EF.SPN").with_desc("Service provider name"))?;
    fs.add_child(gsm, NodeSpec::ef(0x6F78, "EF.ACC").with_desc("Access control class"))?;
    fs.add_child(gsm, NodeSpec::ef(0x6F7E, "EF.LOCI").with_desc("Location information"))?;
    fs.add_child(gsm, NodeSpec::ef(0x6FAD, "EF.AD").with_desc("Administrative data"))?;

    let usim_aid = aid_bytes("a0000000871002");
    let usim = fs.add_application(NodeSpec::adf(&usim_aid, "ADF.USIM"))?;
    fs.add_child(usim, NodeSpec::ef(0x6F07, "EF.IMSI").with_sfi(0x07).with_desc("IMSI"))?;
    fs.add_child(usim, NodeSpec::ef(0x6F38, "EF.UST").with_sfi(0x04).with_desc("USIM service table"))?;
    fs.add_child(usim, NodeSpec::ef(0x6F78, "EF.ACC").with_sfi(0x06).with_desc("Access control class"))?;
    fs.add_child(usim, NodeSpec::ef(0x6FAD, "EF.AD").with_sfi(0x03).with_desc("Administrative data"))?;
    fs.add_child(usim, NodeSpec::ef(0x6FB7, "EF.ECC").with_sfi(0x01).with_desc("Emergency call codes"))?;

    let isim_aid = aid_bytes("a0000000871004");
    let isim = fs.add_application(NodeSpec::adf(&isim_aid, "ADF.ISIM"))?;
    fs.add_child(isim, NodeSpec::ef(0x6F02, "EF.IMPI").with_sfi(0x02).with_desc("IMS private identity"))?;
    fs.add_child(isim, NodeSpec::ef(0x6F03, "EF.DOMAIN").with_sfi(0x05).with_desc("Home network domain"))?;
    fs.add_child(isim, NodeSpec::ef(0x6F04, "EF.IMPU").with_sfi(0x04).with_desc("IMS public identities"))?;
    fs.add_child(isim, NodeSpec::ef(0x6F07, "EF.IST").with_sfi(0x07).with_desc("ISIM service table"))?;

    Ok(fs)
}

fn aid_bytes(hex_aid: &str) -> Vec<u8> {
    // KNOWN_AIDS entries are valid hex by construction.
    hex::decode(hex_aid).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_layout() {
        let fs = standard();
        let mf = fs.mf();
        let telecom = fs.child_by_fid(mf, 0x7F10).unwrap();
        assert_eq!(fs.node(telecom).name.as_deref(), Some("DF.TELECOM"));
        let adn = fs.child_by_name(telecom, "EF.ADN").unwrap();
        assert_eq!(fs.node(adn).fid, Some(0x6F3A));
        // structure unknown until a card confirms it
        assert!(fs.node(adn).ef_info().is_none());
    }

    #[test]
    fn test_same_fid_under_different_dfs() {
        let fs = standard();
        // EF.ACC lives both under DF.GSM and ADF.USIM with fid 6f78
        let gsm = fs.child_by_fid(fs.mf(), 0x7F20).unwrap();
        assert!(fs.child_by_fid(gsm, 0x6F78).is_some());
        let usim = fs.app_by_aid(&hex::decode("a0000000871002").unwrap()).unwrap();
        assert!(fs.child_by_fid(usim, 0x6F78).is_some());
    }

    #[test]
    fn test_app_name_lookup() {
        let full = hex::decode("a0000000871002ffffffff8907090000").unwrap();
        assert_eq!(app_name_for_aid(&full), Some("ADF.USIM"));
        assert_eq!(app_name_for_aid(&hex::decode("a000000087").unwrap()), None);
    }

    #[test]
    fn test_applications_registered() {
        let fs = standard();
        assert_eq!(fs.applications().len(), 2);
    }
}
