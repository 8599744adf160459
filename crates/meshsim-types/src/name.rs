//! Hierarchical service names.
//!
//! A name is nine dot-delimited positional segments:
//!
//! ```text
//! architecture.region.zone.machine.instance.container.process.service.package
//! ```
//!
//! Segments are never reordered. An absent segment is the empty string, and
//! `*` in the region or zone marks a node whose scope crosses that boundary.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Number of segments in every full name.
pub const NAME_SEGMENTS: usize = 9;

/// Region or zone of a node that spans all of them.
pub const WILDCARD: &str = "*";

/// Keeps architecture, region, zone and instance.
pub const FILTER_DEFAULT: &str = "*..*.*.*.*";
/// Keeps architecture, region, zone, service and package.
pub const FILTER_REDUCE: &str = "*.*.*.*..";
/// Drops process and service for containerised nodes.
pub const FILTER_CONTAINER: &str = "*.*.";

const ARCH: usize = 0;
const REGION: usize = 1;
const ZONE: usize = 2;
const MACHINE: usize = 3;
const INSTANCE: usize = 4;
const CONTAINER: usize = 5;
const PROCESS: usize = 6;
const SERVICE: usize = 7;
const PACKAGE: usize = 8;

/// A validated nine-segment node name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    /// Parses a full name, rejecting anything that is not exactly nine segments.
    pub fn parse(name: &str) -> Result<Self, ParseError> {
        let found = name.split('.').count();
        if found != NAME_SEGMENTS {
            return Err(ParseError::InvalidName {
                name: name.to_string(),
                found,
            });
        }
        Ok(Self(name.to_string()))
    }

    /// Builds the name of the `index`th instance of a service.
    ///
    /// The machine, container and process segments are left empty and the
    /// instance segment is the service name followed by a two-digit index.
    ///
    /// # Examples
    ///
    /// ```
    /// # use meshsim_types::ServiceName;
    /// let name = ServiceName::make("t", "us-east-1", "zoneA", "cassTurtle", "priamCassandra", 0);
    /// assert_eq!(name.as_str(), "t.us-east-1.zoneA..cassTurtle00...cassTurtle.priamCassandra");
    /// ```
    pub fn make(
        arch: &str,
        region: &str,
        zone: &str,
        service: &str,
        package: &str,
        index: usize,
    ) -> Self {
        Self::make_container(
            arch,
            region,
            zone,
            "",
            &format!("{service}{index:02}"),
            "",
            "",
            service,
            package,
        )
    }

    /// Builds a name from all nine segments.
    pub fn make_container(
        arch: &str,
        region: &str,
        zone: &str,
        machine: &str,
        instance: &str,
        container: &str,
        process: &str,
        service: &str,
        package: &str,
    ) -> Self {
        Self(format!(
            "{arch}.{region}.{zone}.{machine}.{instance}.{container}.{process}.{service}.{package}"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segment(&self, offset: usize) -> &str {
        self.0.split('.').nth(offset).unwrap_or("")
    }

    pub fn arch(&self) -> &str {
        self.segment(ARCH)
    }

    pub fn region(&self) -> &str {
        self.segment(REGION)
    }

    pub fn zone(&self) -> &str {
        self.segment(ZONE)
    }

    pub fn machine(&self) -> &str {
        self.segment(MACHINE)
    }

    pub fn instance(&self) -> &str {
        self.segment(INSTANCE)
    }

    pub fn container(&self) -> &str {
        self.segment(CONTAINER)
    }

    pub fn process(&self) -> &str {
        self.segment(PROCESS)
    }

    /// The service type, the key used for symbolic dependencies.
    pub fn service(&self) -> &str {
        self.segment(SERVICE)
    }

    /// The package that implements this node's behavior.
    pub fn package(&self) -> &str {
        self.segment(PACKAGE)
    }

    /// `region.zone`, the failure domain this node lives in.
    pub fn region_zone(&self) -> String {
        format!("{}.{}", self.region(), self.zone())
    }

    /// Every zone in `zones` other than this node's, in order.
    pub fn other_zones<'a>(&self, zones: &'a [String]) -> Vec<&'a str> {
        zones
            .iter()
            .map(String::as_str)
            .filter(|zone| *zone != self.zone())
            .collect()
    }

    /// Every region in `regions` other than this node's, starting after it
    /// and wrapping around. Empty if this node's region is not listed.
    pub fn other_regions<'a>(&self, regions: &'a [String]) -> Vec<&'a str> {
        let Some(own) = regions.iter().position(|r| r == self.region()) else {
            return Vec::new();
        };
        (1..regions.len())
            .map(|step| regions[(own + step) % regions.len()].as_str())
            .collect()
    }

    /// Collapsed display form: the reduced filter when `reduce` is set,
    /// otherwise the default or container filter depending on whether the
    /// name carries a container segment.
    pub fn display_name(&self, reduce: bool) -> String {
        if reduce {
            filter(self.as_str(), FILTER_REDUCE)
        } else if self.container().is_empty() {
            filter(self.as_str(), FILTER_DEFAULT)
        } else {
            filter(self.as_str(), FILTER_CONTAINER)
        }
    }
}

impl Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServiceName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.0
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Removes segments from a name for display.
///
/// The filter is aligned with the end of the name; each `*` in the filter
/// drops the name segment it lines up with. Segments before the start of the
/// filter are always kept. A filter longer than the name leaves it unchanged.
///
/// # Examples
///
/// ```
/// # use meshsim_types::filter;
/// assert_eq!(filter("a.b.c", "*.*"), "a");
/// assert_eq!(filter("a.b.c", ".*"), "a.b");
/// ```
pub fn filter(name: &str, pattern: &str) -> String {
    let segments: Vec<&str> = name.split('.').collect();
    let mask: Vec<&str> = pattern.split('.').collect();
    if mask.len() > segments.len() {
        return name.to_string();
    }
    let offset = segments.len() - mask.len();
    segments
        .iter()
        .enumerate()
        .filter(|(i, _)| *i < offset || mask[i - offset] != WILDCARD)
        .map(|(_, segment)| *segment)
        .collect::<Vec<_>>()
        .join(".")
}

/// Filters both ends of a `"from to"` edge. Anything after the second name is dropped.
pub fn filter_edge(edge: &str, reduce: bool) -> Option<String> {
    let mut parts = edge.split_whitespace();
    let from = ServiceName::parse(parts.next()?).ok()?;
    let to = ServiceName::parse(parts.next()?).ok()?;
    Some(format!(
        "{} {}",
        from.display_name(reduce),
        to.display_name(reduce)
    ))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn cass() -> ServiceName {
        ServiceName::make("t", "us-east-1", "zoneA", "cassTurtle", "priamCassandra", 0)
    }

    #[test]
    fn make_extracts_every_segment() {
        let name = cass();
        assert_eq!(name.arch(), "t");
        assert_eq!(name.region(), "us-east-1");
        assert_eq!(name.zone(), "zoneA");
        assert_eq!(name.machine(), "");
        assert_eq!(name.instance(), "cassTurtle00");
        assert_eq!(name.container(), "");
        assert_eq!(name.process(), "");
        assert_eq!(name.service(), "cassTurtle");
        assert_eq!(name.package(), "priamCassandra");
        assert_eq!(name.region_zone(), "us-east-1.zoneA");
    }

    #[test_case("a.b.c"; "too few")]
    #[test_case("a.b.c.d.e.f.g.h.i.j"; "too many")]
    #[test_case(""; "empty")]
    fn parse_rejects_wrong_segment_count(input: &str) {
        assert!(matches!(
            ServiceName::parse(input),
            Err(ParseError::InvalidName { .. })
        ));
    }

    #[test]
    fn parse_accepts_empty_segments() {
        let name = ServiceName::parse("a.*.*.....x.y").unwrap();
        assert_eq!(name.zone(), "*");
        assert_eq!(name.service(), "x");
    }

    #[test]
    fn other_zones_excludes_own() {
        let zones = vec!["zoneA".to_string(), "zoneB".to_string(), "zoneC".to_string()];
        assert_eq!(cass().other_zones(&zones), vec!["zoneB", "zoneC"]);
    }

    #[test]
    fn other_regions_rotates_after_own() {
        let regions = vec![
            "us-east-1".to_string(),
            "us-west-2".to_string(),
            "eu-west-1".to_string(),
        ];
        let name = ServiceName::make("t", "us-west-2", "zoneA", "s", "store", 1);
        assert_eq!(name.other_regions(&regions), vec!["eu-west-1", "us-east-1"]);
        assert!(cass().other_regions(&regions[1..]).is_empty());
    }

    #[test_case("a.b.c", "*.*", "a"; "drop tail")]
    #[test_case("a.b.c", "*", "a.b"; "drop last")]
    #[test_case("a.b.c", "*.*.*.*", "a.b.c"; "filter longer than name")]
    #[test_case("t.r.z.m.i.c.p.s.g", FILTER_REDUCE, "t.r.z.s.g"; "reduce")]
    #[test_case("t.r.z.m.i.c.p.s.g", FILTER_DEFAULT, "t.r.z.i"; "default")]
    #[test_case("t.r.z.m.i.c.p.s.g", FILTER_CONTAINER, "t.r.z.m.i.c.g"; "container")]
    fn filter_drops_wildcard_segments(name: &str, mask: &str, expected: &str) {
        assert_eq!(filter(name, mask), expected);
    }

    #[test]
    fn filter_edge_filters_both_ends() {
        let edge = format!(
            "{} {}",
            cass(),
            ServiceName::make("t", "us-east-1", "zoneB", "web", "karyon", 3)
        );
        assert_eq!(
            filter_edge(&edge, true).unwrap(),
            "t.us-east-1.zoneA.cassTurtle.priamCassandra t.us-east-1.zoneB.web.karyon"
        );
        assert_eq!(filter_edge("just-one", true), None);
    }

    #[test]
    fn serde_rejects_short_names() {
        let json = serde_json::to_string(&cass()).unwrap();
        let back: ServiceName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cass());
        assert!(serde_json::from_str::<ServiceName>("\"a.b\"").is_err());
    }
}
