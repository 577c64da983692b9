//! Cookie Jar: Netscape cookie file parsing and per-request matching (spec §4.4).

use url::Url;

use crate::model::Cookie;

/// Parses a Netscape-format cookie file. Comment lines (`#`), empty lines,
/// and lines with fewer than 7 tab-separated fields are skipped.
pub fn load_netscape(contents: &str) -> Vec<Cookie> {
    contents.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Cookie> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = trimmed.split('\t').collect();
    if fields.len() != 7 {
        return None;
    }
    let expiry: i64 = fields[4].parse().ok()?;
    Some(Cookie {
        domain: fields[0].to_string(),
        include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
        path: fields[2].to_string(),
        secure: fields[3].eq_ignore_ascii_case("TRUE"),
        expiry,
        name: fields[5].to_string(),
        value: fields[6].to_string(),
    })
}

/// Builds the `Cookie` header value for `url`, in file order, joined by `"; "`.
pub fn matching_header(cookies: &[Cookie], url: &Url, now_unix: i64) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let path = url.path();
    let is_https = url.scheme() == "https";

    let parts: Vec<String> = cookies
        .iter()
        .filter(|c| domain_matches(&host, c))
        .filter(|c| path.starts_with(c.path.as_str()))
        .filter(|c| !c.secure || is_https)
        .filter(|c| c.expiry == 0 || c.expiry > now_unix)
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

fn domain_matches(host: &str, cookie: &Cookie) -> bool {
    let cookie_domain = cookie.domain.to_ascii_lowercase();
    if host == cookie_domain {
        return true;
    }
    cookie.include_subdomains && host.ends_with(&format!(".{cookie_domain}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_lines() {
        let file = "example.com\tFALSE\t/\tFALSE\t0\tsession\tabc\n\
                     .example.com\tTRUE\t/app\tTRUE\t9999999999\ttoken\txyz\n";
        let cookies = load_netscape(file);
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "session");
        assert_eq!(cookies[1].include_subdomains, true);
    }

    #[test]
    fn skips_comments_blank_and_malformed_lines() {
        let file = "# a comment\n\n\
                     example.com\tFALSE\t/\tFALSE\t0\tfoo\n\
                     example.com\tFALSE\t/\tFALSE\t0\tfoo\tbar\n";
        let cookies = load_netscape(file);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "foo");
    }

    #[test]
    fn matches_domain_path_secure_and_expiry() {
        let cookies = vec![
            Cookie {
                domain: "example.com".into(),
                include_subdomains: false,
                path: "/".into(),
                secure: false,
                expiry: 0,
                name: "a".into(),
                value: "1".into(),
            },
            Cookie {
                domain: "example.com".into(),
                include_subdomains: false,
                path: "/app".into(),
                secure: true,
                expiry: 100,
                name: "b".into(),
                value: "2".into(),
            },
            Cookie {
                domain: "example.com".into(),
                include_subdomains: false,
                path: "/".into(),
                secure: false,
                expiry: 50,
                name: "expired".into(),
                value: "3".into(),
            },
        ];

        let url = Url::parse("https://example.com/app/page").unwrap();
        let header = matching_header(&cookies, &url, 200).unwrap();
        assert!(header.contains("a=1"));
        assert!(header.contains("b=2"));
        assert!(!header.contains("expired"));
    }

    #[test]
    fn secure_cookie_excluded_over_http() {
        let cookies = vec![Cookie {
            domain: "example.com".into(),
            include_subdomains: false,
            path: "/".into(),
            secure: true,
            expiry: 0,
            name: "s".into(),
            value: "v".into(),
        }];
        let url = Url::parse("http://example.com/").unwrap();
        assert_eq!(matching_header(&cookies, &url, 0), None);
    }

    #[test]
    fn subdomain_match_requires_flag() {
        let cookies = vec![Cookie {
            domain: "example.com".into(),
            include_subdomains: true,
            path: "/".into(),
            secure: false,
            expiry: 0,
            name: "s".into(),
            value: "v".into(),
        }];
        let url = Url::parse("https://sub.example.com/").unwrap();
        assert!(matching_header(&cookies, &url, 0).is_some());
    }
}
