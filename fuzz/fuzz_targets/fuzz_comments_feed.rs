#![no_main]

//! Fuzz target for RSS comment parsing.

use libfuzzer_sys::fuzz_target;

use trac_crawler::feed;

fuzz_target!(|xml: &str| {
    if let Ok(comments) = feed::parse_comments(xml) {
        for comment in comments {
            assert!(feed::pubdate_timestamp(&comment.pub_date).is_ok());
        }
    }
});
