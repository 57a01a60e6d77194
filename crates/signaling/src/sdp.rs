//! Minimal single-audio-stream SDP offer.
//!
//! The service only needs an offer that declares one bundled Opus audio
//! track; ICE credentials and the fingerprint are fixed placeholders.

/// Build the offer SDP. `session_version` fills the `o=` line.
pub fn audio_offer_sdp(session_version: i64) -> String {
    [
        "v=0".to_string(),
        format!("o=- {session_version} 1 IN IP4 127.0.0.1"),
        "s=-".to_string(),
        "t=0 0".to_string(),
        "a=group:BUNDLE audio".to_string(),
        "a=msid-semantic: WMS".to_string(),
        "m=audio 9 UDP/TLS/RTP/SAVPF 111".to_string(),
        "c=IN IP4 0.0.0.0".to_string(),
        "a=rtcp:9 IN IP4 0.0.0.0".to_string(),
        "a=ice-ufrag:siml".to_string(),
        "a=ice-pwd:simliapp".to_string(),
        format!("a=fingerprint:sha-256 {}", PLACEHOLDER_FINGERPRINT),
        "a=setup:actpass".to_string(),
        "a=mid:audio".to_string(),
        "a=sendrecv".to_string(),
        "a=rtcp-mux".to_string(),
        "a=rtpmap:111 opus/48000/2".to_string(),
    ]
    .iter()
    .map(|line| format!("{line}\r\n"))
    .collect()
}

const PLACEHOLDER_FINGERPRINT: &str = "00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF:\
00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF";
