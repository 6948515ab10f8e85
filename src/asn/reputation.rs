const VPN_KEYWORDS: &[&str] = &[
    "vpn", "proxy", "anonymiz", "privacy", "secure", "hide", "tunnel", "socks",
];

const HOSTING_KEYWORDS: &[&str] = &[
    "hosting",
    "cloud",
    "vps",
    "server",
    "datacenter",
    "colocation",
    "dedicated",
    "virtual",
    "compute",
];

const RESIDENTIAL_KEYWORDS: &[&str] = &[
    "comcast",
    "verizon",
    "at&t",
    "charter",
    "cox",
    "spectrum",
    "centurylink",
    "frontier",
    "broadband",
    "cable",
    "dsl",
    "fiber",
    "telecom",
    "residential",
];

/// Score an organisation by how likely its ranges are to host proxies
///
/// VPN/proxy operators score 0.9, hosting providers 0.8, residential ISPs
/// 0.2 and everything else 0.5. Explicit flags take precedence over the
/// name.
pub fn reputation_for_org(org_name: &str, is_hosting: bool, is_proxy: bool) -> f64 {
    let org = org_name.to_lowercase();
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| org.contains(k));

    if is_proxy || mentions(VPN_KEYWORDS) {
        0.9
    } else if is_hosting || mentions(HOSTING_KEYWORDS) {
        0.8
    } else if mentions(RESIDENTIAL_KEYWORDS) {
        0.2
    } else {
        0.5
    }
}
