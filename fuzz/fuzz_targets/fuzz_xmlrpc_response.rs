#![no_main]

//! Fuzz target for the XML-RPC response parser.
//!
//! Tracker replies are untrusted input. Parsing must return an error for
//! anything malformed instead of panicking, and every parsed value must
//! convert to JSON.

use libfuzzer_sys::fuzz_target;

use trac_crawler::xmlrpc::{self, MethodResponse};

fuzz_target!(|body: &str| {
    if let Ok(MethodResponse::Success(value)) = xmlrpc::parse_response(body) {
        let _ = value.as_i64();
        let _ = value.as_str();
        let _ = value.as_timestamp();
        let json = value.into_json();
        let _ = serde_json::to_string_pretty(&json);
    }
});
