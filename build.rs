//! Build script for iptkeeper
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! for the `version` subcommand.

fn main() {
    // Re-run build if the packager overrides the default binary name
    println!("cargo:rerun-if-env-changed=IPTKEEPER_SYSTEM_IPTABLES");

    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
