//! Channel registry.
//!
//! Backed by `channels.tsv` (`number TAB station TAB enabled`, `#` comments).
//! The table is owned by the channel editor; the controller only reads it.

use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub number: u32,
    pub station: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    channels: Vec<Channel>,
}

impl ChannelMap {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut channels = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split('\t');
            let (number, station, enabled) = match (parts.next(), parts.next(), parts.next()) {
                (Some(n), Some(s), Some(e)) => (n, s, e),
                _ => continue,
            };
            let Ok(number) = number.trim().parse::<u32>() else {
                continue;
            };
            channels.push(Channel {
                number,
                station: station.trim().to_uppercase(),
                enabled: enabled.trim() == "1",
            });
        }
        channels.sort_by_key(|c| c.number);
        channels.dedup_by_key(|c| c.number);
        Self { channels }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// All channels in ascending number order, including disabled ones.
    pub fn all(&self) -> &[Channel] {
        &self.channels
    }

    pub fn list_enabled(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|c| c.enabled)
    }

    /// Direct entry resolves disabled channels too.
    pub fn resolve(&self, number: u32) -> Option<&Channel> {
        self.channels.iter().find(|c| c.number == number)
    }

    /// Smallest enabled number strictly greater than `from`, wrapping to the
    /// smallest enabled number.
    pub fn up(&self, from: u32) -> Option<u32> {
        let first = self.list_enabled().map(|c| c.number).next()?;
        self.list_enabled()
            .map(|c| c.number)
            .find(|&n| n > from)
            .or(Some(first))
    }

    /// Largest enabled number strictly smaller than `from`, wrapping to the
    /// largest enabled number.
    pub fn down(&self, from: u32) -> Option<u32> {
        let enabled: Vec<u32> = self.list_enabled().map(|c| c.number).collect();
        let last = *enabled.last()?;
        enabled.iter().rev().find(|&&n| n < from).copied().or(Some(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "# retro tv lineup\n\
                         2\tWEATHER\t1\n\
                         3\tNICK\t1\n\
                         5\tMTV\t1\n\
                         7\tSCIFI\t0\n\
                         9\tTOONS\t1\n";

    #[test]
    fn parse_skips_comments_and_sorts() {
        let map = ChannelMap::parse(TABLE);
        assert_eq!(map.all().len(), 5);
        assert_eq!(map.resolve(5).unwrap().station, "MTV");
        assert!(!map.resolve(7).unwrap().enabled);
        assert!(map.resolve(4).is_none());
    }

    #[test]
    fn up_skips_disabled_and_wraps() {
        let map = ChannelMap::parse(TABLE);
        assert_eq!(map.up(3), Some(5));
        assert_eq!(map.up(5), Some(9)); // 7 is disabled
        assert_eq!(map.up(9), Some(2)); // wrap
        assert_eq!(map.down(2), Some(9)); // wrap
        assert_eq!(map.down(9), Some(5));
    }

    #[test]
    fn up_then_down_returns_to_start() {
        let map = ChannelMap::parse(TABLE);
        for start in [2u32, 3, 5, 9] {
            let mut ch = start;
            for _ in 0..7 {
                ch = map.up(ch).unwrap();
            }
            for _ in 0..7 {
                ch = map.down(ch).unwrap();
            }
            assert_eq!(ch, start);
        }
    }

    #[test]
    fn empty_lineup_navigates_nowhere() {
        let map = ChannelMap::parse("# nothing here\n");
        assert!(map.up(3).is_none());
        assert!(map.down(3).is_none());
    }
}
