//! Inbound patterns of the world module

use regex::escape;

/// World join acknowledgement on the acting client
pub const WORLD_JOIN_ACK: &str = ":.*2200.*";

/// World part acknowledgement on the acting client
pub const WORLD_PART_ACK: &str = ":.*2201.*";

/// Move acknowledgement on the acting client
pub const MOVE_ACK: &str = ":.*2210.*";

/// World user mode being set
pub const WORLD_USER_MODE: &str = r"MODE.*\+y";

/// Peer view of a world join
pub const PEER_WORLD_JOIN: &str = "WORLD.*JOIN";

/// Peer view of a world part
pub const PEER_WORLD_PART: &str = "WORLD.*PART";

/// Peer view of a move
pub const PEER_WORLD_MOVE: &str = "WORLD.*MOVE";

/// Location message tag
pub const LOCATION_TAG: &str = "@world/location=";

/// Direction message tag
pub const DIRECTION_TAG: &str = "@world/direction=";

/// Capability reply for `capability`, ACK or NAK in capture group 1
///
/// The verdict is read from the CAP subcommand position so a nick or
/// server name containing `ACK`/`NAK` cannot flip it.
#[must_use]
pub fn capability_reply(capability: &str) -> String {
    format!(
        r"^(?:@\S+ )?:\S+ CAP \S+ (ACK|NAK) :?(?:.*\s)?{}(?:\s|$)",
        escape(capability)
    )
}

/// Pattern capturing the value of a message tag anywhere in the tag block
///
/// `tag` is the bare key, e.g. `world/location`.
#[must_use]
pub fn tag_value(tag: &str) -> String {
    format!(r"^@(?:[^ ]*;)?{}=([^; ]*)", escape(tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn capability_reply_reads_subcommand_token() {
        let re = Regex::new(&capability_reply("world/features")).unwrap();
        let verdict = |line: &str| re.captures(line).map(|c| c[1].to_string());

        assert_eq!(verdict(":irc2.test.net CAP c2a NAK :world/features").as_deref(), Some("NAK"));
        assert_eq!(verdict(":irc2.test.net CAP c2a ACK :world/features").as_deref(), Some("ACK"));
        assert_eq!(verdict(":irc3.test.net CAP JACK NAK :world/features").as_deref(), Some("NAK"));
        assert_eq!(verdict(":NAKED.net CAP c1a ACK :multi-prefix world/features").as_deref(), Some("ACK"));
        assert_eq!(verdict("@time=x :irc1.test.net CAP c1a ACK :world/features").as_deref(), Some("ACK"));
        assert!(verdict(":irc1.test.net CAP c1a ACK :world/featuresX").is_none());
        assert!(verdict(":irc1.test.net NOTICE c1a :CAP c1a ACK world/features").is_none());
    }

    #[test]
    fn tag_value_finds_later_tags() {
        let re = Regex::new(&tag_value("world/direction")).unwrap();
        let line = "@world/location=1,0;world/direction=east :irc1.test.net 2210 c1a east";
        assert_eq!(&re.captures(line).unwrap()[1], "east");
        assert!(re.captures(":irc1.test.net 2210 c1a world/direction=east").is_none());
    }

    #[test]
    fn move_patterns_match_broadcast_lines() {
        let peer = Regex::new(PEER_WORLD_MOVE).unwrap();
        assert!(peer.is_match(":c1a!c1a@irc1.test.net WORLD MOVE north"));
        assert!(!peer.is_match("@world/location=0,1 :c1a!c1a@irc1.test.net WORLD LOCATION 0 1"));
        assert!(Regex::new(WORLD_USER_MODE).unwrap().is_match(":irc1.test.net MODE c1a +y"));
    }
}
