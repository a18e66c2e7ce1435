use std::fmt;
use std::str::FromStr;

use can_format::{BusName, LogMessage};

use crate::error::FilterError;

pub const MAX_FILTERS: usize = 3;

/// `[bus:]id[-id]`, or a lone bus digit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogFilter {
    pub bus: Option<u32>,
    pub from: u32,
    pub to: u32,
}

impl LogFilter {
    pub fn bus(bus: u32) -> LogFilter {
        LogFilter {
            bus: Some(bus),
            from: 0,
            to: u32::MAX,
        }
    }

    /// `id` is `None` for entries that carry no frame; those are matched on
    /// their bus alone.
    pub fn matches(&self, origin: Option<&BusName>, id: Option<u32>) -> bool {
        if let Some(bus) = self.bus {
            if origin.and_then(BusName::number) != Some(bus) {
                return false;
            }
        }
        match id {
            Some(id) => self.from <= id && id <= self.to,
            None => true,
        }
    }
}

impl FromStr for LogFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FilterError::Invalid(s.to_owned());

        if s.len() == 1 {
            let bus = s.parse().map_err(|_| invalid())?;
            return Ok(LogFilter::bus(bus));
        }

        let (bus, range) = match s.split_once(':') {
            Some((bus, range)) => (Some(bus.parse().map_err(|_| invalid())?), range),
            None => (None, s),
        };
        let parse_id = |id: &str| u32::from_str_radix(id, 16).map_err(|_| invalid());
        let (from, to) = match range.split_once('-') {
            Some((from, to)) => (parse_id(from)?, parse_id(to)?),
            None => {
                let id = parse_id(range)?;
                (id, id)
            }
        };

        Ok(LogFilter {
            bus,
            from: from.min(to),
            to: from.max(to),
        })
    }
}

impl fmt::Display for LogFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(bus) = self.bus {
            if self.from == 0 && self.to == u32::MAX {
                return write!(f, "{}", bus);
            }
            write!(f, "{}:", bus)?;
        }
        if self.from == self.to {
            write!(f, "{:x}", self.from)
        } else {
            write!(f, "{:x}-{:x}", self.from, self.to)
        }
    }
}

/// Filters of one logger. Empty passes everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterSet {
    filters: Vec<LogFilter>,
}

impl FilterSet {
    pub fn new(filters: Vec<LogFilter>) -> Result<FilterSet, FilterError> {
        if filters.len() > MAX_FILTERS {
            return Err(FilterError::TooMany(MAX_FILTERS));
        }
        Ok(FilterSet { filters })
    }

    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<FilterSet, FilterError> {
        let filters = specs
            .iter()
            .map(|spec| spec.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        FilterSet::new(filters)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogFilter> {
        self.filters.iter()
    }

    pub fn matches(&self, message: &LogMessage) -> bool {
        let id = message.entry.frame().map(|frame| frame.id());
        self.filters.is_empty()
            || self
                .filters
                .iter()
                .any(|filter| filter.matches(message.origin.as_ref(), id))
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filters.is_empty() {
            return f.write_str("off");
        }
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", filter)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_format::{BusStatus, Frame, InfoKind, LogEntry, StatusKind};

    fn rx(bus: &str, id: u32) -> LogMessage {
        LogMessage::new(
            Some(BusName::new(bus)),
            LogEntry::Rx(Frame::standard(id, &[]).unwrap()),
        )
    }

    #[test]
    fn parses_all_forms() {
        assert_eq!("2".parse::<LogFilter>().unwrap(), LogFilter::bus(2));
        assert_eq!(
            "3:780-7ff".parse::<LogFilter>().unwrap(),
            LogFilter { bus: Some(3), from: 0x780, to: 0x7ff }
        );
        assert_eq!(
            "7df".parse::<LogFilter>().unwrap(),
            LogFilter { bus: None, from: 0x7df, to: 0x7df }
        );
        assert_eq!(
            "1:1ff-100".parse::<LogFilter>().unwrap(),
            LogFilter { bus: Some(1), from: 0x100, to: 0x1ff }
        );
        assert!("x:100".parse::<LogFilter>().is_err());
        assert!("1:".parse::<LogFilter>().is_err());
        assert!("100-zz".parse::<LogFilter>().is_err());
    }

    #[test]
    fn display_matches_input_syntax() {
        let set = FilterSet::parse(&["1:100-1ff", "7df"]).unwrap();
        assert_eq!(set.to_string(), "1:100-1ff 7df");
        assert_eq!(FilterSet::default().to_string(), "off");
    }

    #[test]
    fn at_most_three() {
        assert!(matches!(
            FilterSet::parse(&["1", "2", "3", "100"]),
            Err(FilterError::TooMany(3))
        ));
    }

    #[test]
    fn empty_set_matches_everything() {
        let set = FilterSet::default();
        assert!(set.matches(&rx("can1", 0x123)));
        assert!(set.matches(&LogMessage::new(None, LogEntry::Info(InfoKind::Comment, "x".into()))));
    }

    #[test]
    fn bus_and_range_must_both_match() {
        let set = FilterSet::parse(&["2:100-1ff"]).unwrap();
        assert!(set.matches(&rx("can2", 0x100)));
        assert!(set.matches(&rx("can2", 0x1ff)));
        assert!(!set.matches(&rx("can2", 0x200)));
        assert!(!set.matches(&rx("can2", 0x0ff)));
        assert!(!set.matches(&rx("can1", 0x150)));
    }

    #[test]
    fn any_filter_may_match() {
        let set = FilterSet::parse(&["1", "3:780-7ff"]).unwrap();
        assert!(set.matches(&rx("can1", 0x001)));
        assert!(set.matches(&rx("can3", 0x7e8)));
        assert!(!set.matches(&rx("can3", 0x100)));
        assert!(!set.matches(&rx("can2", 0x7e8)));
    }

    #[test]
    fn status_entries_match_on_bus_only() {
        let set = FilterSet::parse(&["2:100"]).unwrap();
        let status = |bus: &str| {
            LogMessage::new(
                Some(BusName::new(bus)),
                LogEntry::Status(StatusKind::Error, BusStatus::default()),
            )
        };
        assert!(set.matches(&status("can2")));
        assert!(!set.matches(&status("can1")));
    }
}
