//! RFC 6265 Cookie Compliance Tests
//!
//! https://www.rfc-editor.org/rfc/rfc6265

use chrono::{Duration, Utc};
use url::Url;
use wiretrace::cookie::{domain_matches, path_matches};
use wiretrace::{Cookie, CookieJar};

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[test]
fn test_secure_flag_enforcement_rfc6265_section_5_4() {
    let jar = CookieJar::new();
    jar.store(&url("https://example.com/"), ["token=1; Secure"]);

    assert!(
        jar.cookie_header(&url("http://example.com/")).is_none(),
        "Secure cookie MUST NOT be sent to http"
    );
    assert_eq!(
        jar.cookie_header(&url("https://example.com/")).as_deref(),
        Some("token=1")
    );
    assert_eq!(
        jar.cookie_header(&url("wss://example.com/socket")).as_deref(),
        Some("token=1"),
        "wss is a secure channel"
    );
}

#[test]
fn test_domain_attribute_rfc6265_section_5_2_3() {
    let jar = CookieJar::new();
    jar.store(
        &url("https://www.example.com/"),
        ["wide=1; Domain=.Example.COM", "narrow=2"],
    );

    let wide = jar.get("example.com", "wide").unwrap();
    assert_eq!(wide.domain, "example.com");

    assert_eq!(
        jar.cookie_header(&url("https://api.example.com/")).as_deref(),
        Some("wide=1"),
        "host-only cookie stays with its host"
    );
    assert_eq!(
        jar.cookie_header(&url("https://www.example.com/")).as_deref(),
        Some("wide=1; narrow=2")
    );
    assert!(jar.cookie_header(&url("https://notexample.com/")).is_none());
}

#[test]
fn test_foreign_domain_rejected_rfc6265_section_5_3() {
    let jar = CookieJar::new();
    jar.store(&url("https://example.com/"), ["evil=1; Domain=attacker.com"]);
    assert!(jar.is_empty());

    let res = Cookie::parse("name=val; Domain=sub.example.com", &url("https://example.com/"));
    assert!(res.is_none(), "a parent host cannot set a cookie for a subdomain");
}

#[test]
fn test_domain_and_path_matching_rfc6265_section_5_1() {
    assert!(domain_matches("example.com", "example.com"));
    assert!(domain_matches("a.b.example.com", "example.com"));
    assert!(!domain_matches("badexample.com", "example.com"));

    assert!(path_matches("/docs", "/docs"));
    assert!(path_matches("/docs/web", "/docs"));
    assert!(path_matches("/docs/web", "/docs/"));
    assert!(!path_matches("/docsets", "/docs"));
    assert!(!path_matches("/", "/docs"));
}

#[test]
fn test_default_path_from_request_rfc6265_section_5_1_4() {
    let jar = CookieJar::new();
    jar.store(&url("https://example.com/account/login"), ["sid=abc"]);

    let cookie = jar.get("example.com", "sid").unwrap();
    assert_eq!(cookie.path, "/account");
    assert!(jar.cookie_header(&url("https://example.com/account/settings")).is_some());
    assert!(jar.cookie_header(&url("https://example.com/other")).is_none());
}

#[test]
fn test_max_age_zero_deletes_rfc6265_section_5_2_2() {
    let jar = CookieJar::new();
    let origin = url("https://example.com/");
    jar.store(&origin, ["sid=abc; Max-Age=3600"]);
    assert!(jar.get("example.com", "sid").unwrap().is_persistent());

    jar.store(&origin, ["sid=gone; Max-Age=0"]);
    let cookie = jar.get("example.com", "sid").unwrap();
    assert!(cookie.is_expired());
    assert!(!cookie.is_persistent());
    assert!(jar.cookie_header(&origin).is_none());
    assert!(jar.persistent_cookies().is_empty());

    assert_eq!(jar.remove_expired(), 1);
    assert!(jar.is_empty());
}

#[test]
fn test_max_age_precedence_over_expires_rfc6265_section_5_3() {
    let origin = url("https://example.com/");
    let before = Utc::now();

    for header in [
        "a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT; Max-Age=600",
        "a=1; Max-Age=600; Expires=Wed, 21 Oct 2015 07:28:00 GMT",
    ] {
        let cookie = Cookie::parse(header, &origin).unwrap();
        let expires = cookie.expires.unwrap();
        assert!(expires > before + Duration::seconds(590), "{}", header);
        assert!(expires <= Utc::now() + Duration::seconds(600), "{}", header);
    }

    let cookie = Cookie::parse("a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT", &origin).unwrap();
    assert!(cookie.is_expired());
}

#[test]
fn test_last_write_wins_rfc6265_section_5_3_step_11() {
    let jar = CookieJar::new();
    let origin = url("https://example.com/");
    jar.store(&origin, ["a=1", "b=2"]);
    jar.store(&origin, ["a=3"]);

    assert_eq!(jar.len(), 2);
    assert_eq!(jar.cookie_header(&origin).as_deref(), Some("b=2; a=3"));

    // Same name on another path is a different cookie
    jar.store(&origin, ["a=4; Path=/api"]);
    assert_eq!(jar.len(), 3);
    assert_eq!(
        jar.cookie_header(&url("https://example.com/api/v1")).as_deref(),
        Some("b=2; a=3; a=4")
    );
}

#[test]
fn test_malformed_set_cookie_ignored() {
    let jar = CookieJar::new();
    jar.store(&url("https://example.com/"), ["no-equals-sign", "=value", "ok=1; Max-Age=abc; Path=relative"]);

    assert_eq!(jar.len(), 1);
    let cookie = jar.get("example.com", "ok").unwrap();
    assert_eq!(cookie.expires, None, "bad Max-Age is ignored");
    assert_eq!(cookie.path, "/", "non-absolute Path is ignored");
}

#[test]
fn test_http_only_and_session_cookies() {
    let cookie = Cookie::parse("sid=1; HttpOnly", &url("https://example.com/")).unwrap();
    assert!(cookie.http_only);
    assert!(!cookie.is_persistent());
    assert!(!cookie.is_expired());
}

#[test]
fn test_json_export_keeps_persistent_cookies() {
    let jar = CookieJar::new();
    let origin = url("https://example.com/");
    jar.store(&origin, ["session=1", "remember=2; Max-Age=86400; Secure"]);

    let json = jar.export_json().unwrap();
    let restored = CookieJar::new();
    assert_eq!(restored.import_json(&json).unwrap(), 1);

    let cookie = restored.get("example.com", "remember").unwrap();
    assert!(cookie.secure);
    assert_eq!(cookie, jar.get("example.com", "remember").unwrap());
    assert!(restored.get("example.com", "session").is_none());
}

#[tokio::test]
async fn test_netscape_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cookies.txt");

    let jar = CookieJar::new();
    jar.store(
        &url("https://www.example.com/app/login"),
        [
            "sid=abc; Domain=example.com; Path=/; Secure; HttpOnly; Max-Age=3600",
            "pref=dark",
            "old=1; Max-Age=0",
        ],
    );
    jar.save_to_file(&path).await.unwrap();

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(contents.starts_with("# Netscape HTTP Cookie File\n"));
    assert!(contents.contains("#HttpOnly_example.com\tTRUE\t/\tTRUE\t"));
    assert!(!contents.contains("old"), "expired cookies are not saved");

    let loaded = CookieJar::new();
    assert_eq!(loaded.load_from_file(&path).await.unwrap(), 2);

    let sid = loaded.get("example.com", "sid").unwrap();
    assert!(sid.secure && sid.http_only);
    assert_eq!(sid.expires, jar.get("example.com", "sid").unwrap().expires);

    let pref = loaded.get("www.example.com", "pref").unwrap();
    assert_eq!(pref.path, "/app");
    assert_eq!(pref.expires, None);
}

#[tokio::test]
async fn test_netscape_file_skips_malformed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cookies.txt");
    tokio::fs::write(
        &path,
        "# comment\n\nexample.com\tTRUE\t/\tFALSE\t0\ta\t1\nbroken line\n",
    )
    .await
    .unwrap();

    let jar = CookieJar::new();
    assert_eq!(jar.load_from_file(&path).await.unwrap(), 1);
    assert_eq!(jar.cookie_header(&url("http://example.com/")).as_deref(), Some("a=1"));

    assert!(jar.load_from_file(dir.path().join("missing.txt")).await.is_err());
}
