//! Policy guard demonstration.
//!
//! This example walks through the request checks of a small web service:
//! 1. Refuse access to another user's resource
//! 2. Throttle repeated login attempts
//! 3. Reject weak passwords at signup
//! 4. Keep avatar fetches away from internal addresses
//! 5. Sanitize untrusted profile fields
//!
//! Run with: `cargo run --example policy_guard`

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use policy_guard::{
    audit::AuditTrail, AllowList, AllowedDestination, EmailSanitizer, ManualClock, Ownership,
    PolicyGuard, PolicySpec, PreferenceSanitizer, Principal, RequestContext, ResourceRef,
    Sanitizer, StaticResolver, StrongCredential, Tainted, Throttle, Verdict,
};
use serde_json::json;

fn show(label: &str, verdict: &Verdict) {
    match verdict {
        Verdict::Allow => println!("✓ {label}: allowed"),
        Verdict::Deny(denial) => println!("✗ {label}: {denial}"),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(true).init();
    println!("=== Policy Guard Example ===\n");

    let clock = Arc::new(ManualClock::new());
    let trail = Arc::new(AuditTrail::new());
    let resolver = StaticResolver::new()
        .with_host("avatars.example.com", [IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))])
        .with_host("metadata.example.com", [IpAddr::V4(Ipv4Addr::new(169, 254, 169, 254))]);

    let guard = PolicyGuard::builder()
        .clock(clock.clone())
        .resolver(Arc::new(resolver))
        .allow_list(AllowList::new(["avatars.example.com", "metadata.example.com"])?)
        .audit_sink(trail.clone())
        .policy(PolicySpec::new("view_profile").require(Ownership))
        .policy(PolicySpec::new("login").require(Throttle::new(5, Duration::from_secs(20))))
        .policy(
            PolicySpec::new("signup")
                .require(Throttle::new(3, Duration::from_secs(60)).scoped("accounts"))
                .require(StrongCredential),
        )
        .policy(PolicySpec::new("fetch_avatar").require(AllowedDestination))
        .build()?;

    let alice = Principal::user("user-a", "Alice");
    let source = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));

    // Scenario 1: Ownership
    println!("--- Scenario 1: Ownership ---");
    for (owner, label) in [("user-a", "own profile"), ("user-b", "someone else's profile")] {
        let ctx = RequestContext::builder("req-view", source)
            .actor(alice.clone())
            .target(ResourceRef::new(format!("profile-{owner}"), owner))
            .build();
        show(label, &guard.evaluate("view_profile", &ctx));
    }

    // Scenario 2: Login throttling
    println!("\n--- Scenario 2: Login throttling ---");
    let login = RequestContext::builder("req-login", source).build();
    for attempt in 1..=6 {
        show(&format!("login attempt {attempt}"), &guard.evaluate("login", &login));
    }
    clock.advance(Duration::from_secs(20));
    show("login after the window", &guard.evaluate("login", &login));

    // Scenario 3: Credential strength
    println!("\n--- Scenario 3: Credential strength ---");
    for candidate in ["password", "Correct-Horse-9"] {
        let ctx = RequestContext::builder("req-signup", source)
            .password(candidate)
            .build();
        show("signup", &guard.evaluate("signup", &ctx));
    }

    // Scenario 4: Outbound destinations
    println!("\n--- Scenario 4: Outbound destinations ---");
    for url in [
        "https://avatars.example.com/u/1.png",
        "http://avatars.example.com/u/1.png",
        "https://metadata.example.com/latest/meta-data/",
        "https://127.0.0.1/admin",
    ] {
        let ctx = RequestContext::builder("req-fetch", source).url(url).build();
        show(url, &guard.evaluate("fetch_avatar", &ctx));
    }

    // Scenario 5: Sanitizing profile fields
    println!("\n--- Scenario 5: Sanitizing profile fields ---");
    let email = EmailSanitizer.sanitize(Tainted::new(" Alice@Example.COM ".to_string()))?;
    println!("✓ email stored as {}", email.as_ref());
    let prefs = PreferenceSanitizer::default()
        .sanitize(Tainted::new(json!({ "theme": "dark", "is_admin": "true" })))?;
    println!("✓ preferences stored as {}", prefs.as_ref());

    println!("\n--- Audit trail ({} events) ---", trail.len());
    for event in trail.events() {
        println!("{event}");
    }
    Ok(())
}
