//! Scenario table reader.
//!
//! A scenario is a CSV table split into sections by label rows:
//!
//! ```text
//! Publishers
//! Role,Subscription,Frequency,Size,History,Depth,Reliability,Durability
//! scout,odom,10,1024,keep_last,10,reliable,volatile
//! Subscribers
//! Role,Subscription,History,Depth,Reliability,Durability
//! base,odom,keep_last,10,reliable,volatile
//! Robots
//! Name,Role,X,Y,Z,Moves
//! r1,scout,0,0,0,true
//! b1,base
//! Stations
//! Name,param:value
//! r1,position:0;0;0,range:50
//! Propagation Model
//! model:logDistance,exp:4
//! ```
//!
//! Robot rows carry either just a name and role or a full position and
//! mobility flag. `Stations`, `Links`, `Propagation Model` and
//! `Mobility Model` rows hold `param:value` cells; values that parse as
//! numbers become numbers, other values are text with `;` read as `,`.
//!
//! The reader is an explicit state machine. Section labels are the only
//! transitions, and a section may be entered once, so a repeated or misplaced
//! section is reported instead of silently changing how later rows parse.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::types::Flow;

/// Parser state: the section the next data row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Section {
    /// Before the first section label
    Header,
    Publishers,
    Subscribers,
    Robots,
    Stations,
    Links,
    PropagationModel,
    MobilityModel,
}

impl Section {
    /// Leading cells of the column header row accepted in the section
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Section::Header => &[],
            Section::Publishers => &[
                "Role", "Subscription", "Frequency", "Size", "History", "Depth", "Reliability", "Durability",
            ],
            Section::Subscribers => &["Role", "Subscription", "History", "Depth", "Reliability", "Durability"],
            Section::Robots => &["Name", "Role"],
            Section::Stations | Section::Links => &["Name", "param:value"],
            Section::PropagationModel | Section::MobilityModel => &["param:value"],
        }
    }

    /// Accepted field counts of a data row
    fn field_counts(self) -> &'static str {
        match self {
            Section::Header => "0",
            Section::Publishers => "8",
            Section::Subscribers => "6",
            Section::Robots => "2 or 6",
            Section::Stations | Section::Links | Section::PropagationModel | Section::MobilityModel => "1 or more",
        }
    }

    fn accepts_field_count(self, n: usize) -> bool {
        match self {
            Section::Header => false,
            Section::Publishers => n == 8,
            Section::Subscribers => n == 6,
            Section::Robots => n == 2 || n == 6,
            Section::Stations | Section::Links | Section::PropagationModel | Section::MobilityModel => n >= 1,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Header => write!(f, "Header"),
            Section::Publishers => write!(f, "Publishers"),
            Section::Subscribers => write!(f, "Subscribers"),
            Section::Robots => write!(f, "Robots"),
            Section::Stations => write!(f, "Stations"),
            Section::Links => write!(f, "Links"),
            Section::PropagationModel => write!(f, "Propagation Model"),
            Section::MobilityModel => write!(f, "Mobility Model"),
        }
    }
}

/// Transition table: label text in the first column -> next state
const TRANSITIONS: &[(&str, Section)] = &[
    ("Publishers", Section::Publishers),
    ("Subscribers", Section::Subscribers),
    ("Robots", Section::Robots),
    ("Stations", Section::Stations),
    ("Links", Section::Links),
    ("Propagation Model", Section::PropagationModel),
    ("Mobility Model", Section::MobilityModel),
];

/// Look up the section a label row switches to
pub fn transition_for(label: &str) -> Option<Section> {
    TRANSITIONS
        .iter()
        .find(|(text, _)| *text == label)
        .map(|(_, section)| *section)
}

/// Errors in a scenario table
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScenarioError {
    #[error("line {line}: cannot enter {to} from {from}: section already read")]
    InvalidTransition { line: u64, from: Section, to: Section },
    #[error("line {line}: data row outside of any section: {row}")]
    RowOutsideSection { line: u64, row: String },
    #[error("line {line}: {section} row needs {expected} fields, found {found}")]
    FieldCount {
        line: u64,
        section: Section,
        expected: &'static str,
        found: usize,
    },
    #[error("line {line}: invalid {field} '{value}'")]
    InvalidValue {
        line: u64,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: unreadable row: {message}")]
    Unreadable { line: u64, message: String },
}

/// History policy of a QoS profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum History {
    KeepLast,
    KeepAll,
}

/// Reliability policy of a QoS profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    Reliable,
    BestEffort,
}

/// Durability policy of a QoS profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    TransientLocal,
    Volatile,
}

/// Delivery parameters of a publisher or subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosProfile {
    pub history: History,
    /// Queue depth, used with `keep_last`
    pub depth: u32,
    pub reliability: Reliability,
    pub durability: Durability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherRecord {
    pub role: String,
    pub subscription: String,
    pub frequency_hz: u32,
    pub size_bytes: u64,
    pub qos: QosProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberRecord {
    pub role: String,
    pub subscription: String,
    pub qos: QosProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotRecord {
    pub name: String,
    pub role: String,
    /// Only present in six-column robot rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moves: Option<bool>,
}

/// Value of a `param:value` cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    fn parse(value: &str) -> Self {
        match value.parse::<f64>() {
            Ok(number) => ParamValue::Number(number),
            Err(_) => ParamValue::Text(value.replace(';', ",")),
        }
    }
}

pub type Params = BTreeMap<String, ParamValue>;

/// Typed contents of a scenario table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub publishers: Vec<PublisherRecord>,
    pub subscribers: Vec<SubscriberRecord>,
    pub robots: Vec<RobotRecord>,
    /// Emulated wireless station parameters by robot name
    pub stations: BTreeMap<String, Params>,
    pub links: BTreeMap<String, Params>,
    pub propagation_model: Params,
    pub mobility_model: Params,
}

impl Scenario {
    /// Robot names subscribed to each subscription, in robot order
    pub fn recipients(&self) -> BTreeMap<String, Vec<String>> {
        let mut recipients: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for robot in &self.robots {
            for subscriber in self.subscribers.iter().filter(|s| s.role == robot.role) {
                recipients
                    .entry(subscriber.subscription.clone())
                    .or_default()
                    .push(robot.name.clone());
            }
        }
        recipients
    }

    /// Every (sender, receiver, channel) flow the scenario should produce
    pub fn expected_flows(&self) -> BTreeSet<Flow> {
        let recipients = self.recipients();
        let mut flows = BTreeSet::new();

        for robot in &self.robots {
            for publisher in self.publishers.iter().filter(|p| p.role == robot.role) {
                for receiver in recipients.get(&publisher.subscription).into_iter().flatten() {
                    flows.insert(Flow::new(&robot.name, receiver, &publisher.subscription));
                }
            }
        }
        flows
    }

    /// Consistency problems that do not prevent a run
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let recipients = self.recipients();

        for publisher in &self.publishers {
            if !recipients.contains_key(&publisher.subscription) {
                warnings.push(format!(
                    "Subscription '{}' published by role '{}' has no subscribing robot",
                    publisher.subscription, publisher.role
                ));
            }
            if !self.robots.iter().any(|r| r.role == publisher.role) {
                warnings.push(format!("Publisher role '{}' is not assigned to any robot", publisher.role));
            }
        }

        let mut names = BTreeSet::new();
        for robot in &self.robots {
            if !names.insert(robot.name.as_str()) {
                warnings.push(format!("Robot name '{}' is used more than once", robot.name));
            }
        }

        for (kind, entries) in [("Station", &self.stations), ("Link", &self.links)] {
            for name in entries.keys().filter(|n| !names.contains(n.as_str())) {
                warnings.push(format!("{} entry '{}' does not name a robot", kind, name));
            }
        }

        warnings
    }
}

fn parse_number<T: std::str::FromStr>(line: u64, field: &'static str, value: &str) -> Result<T, ScenarioError> {
    value.parse().map_err(|_| ScenarioError::InvalidValue {
        line,
        field,
        value: value.to_string(),
    })
}

/// Parse `param:value` cells; empty cells are skipped
fn parse_params(line: u64, cells: &[&str]) -> Result<Params, ScenarioError> {
    let mut params = Params::new();
    for cell in cells.iter().filter(|c| !c.is_empty()) {
        let (key, value) = match cell.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() && !value.contains(':') => (key.trim(), value.trim()),
            _ => {
                return Err(ScenarioError::InvalidValue {
                    line,
                    field: "param:value cell",
                    value: cell.to_string(),
                })
            }
        };
        params.insert(key.to_string(), ParamValue::parse(value));
    }
    Ok(params)
}

fn parse_robot(line: u64, fields: &[&str]) -> Result<RobotRecord, ScenarioError> {
    let (position, moves) = if fields.len() == 6 {
        let position = Position {
            x: parse_number(line, "x", fields[2])?,
            y: parse_number(line, "y", fields[3])?,
            z: parse_number(line, "z", fields[4])?,
        };
        let moves = match fields[5] {
            "true" => true,
            "false" => false,
            other => {
                return Err(ScenarioError::InvalidValue {
                    line,
                    field: "moves",
                    value: other.to_string(),
                })
            }
        };
        (Some(position), Some(moves))
    } else {
        (None, None)
    };

    Ok(RobotRecord {
        name: fields[0].to_string(),
        role: fields[1].to_string(),
        position,
        moves,
    })
}

fn parse_qos(line: u64, fields: &[&str]) -> Result<QosProfile, ScenarioError> {
    let invalid = |field: &'static str, value: &str| ScenarioError::InvalidValue {
        line,
        field,
        value: value.to_string(),
    };

    let history = match fields[0] {
        "keep_last" => History::KeepLast,
        "keep_all" => History::KeepAll,
        other => return Err(invalid("history policy", other)),
    };
    let depth = parse_number(line, "depth", fields[1])?;
    let reliability = match fields[2] {
        "reliable" => Reliability::Reliable,
        "best_effort" => Reliability::BestEffort,
        other => return Err(invalid("reliability policy", other)),
    };
    let durability = match fields[3] {
        "transient_local" => Durability::TransientLocal,
        "volatile" => Durability::Volatile,
        other => return Err(invalid("durability policy", other)),
    };

    Ok(QosProfile {
        history,
        depth,
        reliability,
        durability,
    })
}

/// Finite-state reader over the rows of a scenario table
#[derive(Debug)]
pub struct ScenarioReader {
    state: Section,
    visited: BTreeSet<Section>,
    scenario: Scenario,
}

impl Default for ScenarioReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioReader {
    pub fn new() -> Self {
        Self {
            state: Section::Header,
            visited: BTreeSet::new(),
            scenario: Scenario::default(),
        }
    }

    pub fn state(&self) -> Section {
        self.state
    }

    /// Move to `to`, rejecting a section that was already read
    fn enter(&mut self, line: u64, to: Section) -> Result<(), ScenarioError> {
        if !self.visited.insert(to) {
            return Err(ScenarioError::InvalidTransition {
                line,
                from: self.state,
                to,
            });
        }
        log::debug!("line {}: {} -> {}", line, self.state, to);
        self.state = to;
        Ok(())
    }

    /// Feed one row of trimmed fields
    pub fn feed(&mut self, line: u64, fields: &[&str]) -> Result<(), ScenarioError> {
        // Spreadsheet exports pad rows with empty cells
        let len = fields.iter().rposition(|f| !f.is_empty()).map_or(0, |i| i + 1);
        let fields = &fields[..len];

        // Blank row, empty first column, or comment
        if fields.is_empty() || fields[0].is_empty() || fields[0].starts_with('#') {
            return Ok(());
        }

        if let Some(to) = transition_for(fields[0]) {
            return self.enter(line, to);
        }

        let columns = self.state.columns();
        if !columns.is_empty() && fields.starts_with(columns) {
            return Ok(());
        }

        if self.state == Section::Header {
            return Err(ScenarioError::RowOutsideSection {
                line,
                row: fields.join(","),
            });
        }
        if !self.state.accepts_field_count(fields.len()) {
            return Err(ScenarioError::FieldCount {
                line,
                section: self.state,
                expected: self.state.field_counts(),
                found: fields.len(),
            });
        }

        match self.state {
            Section::Publishers => self.scenario.publishers.push(PublisherRecord {
                role: fields[0].to_string(),
                subscription: fields[1].to_string(),
                frequency_hz: parse_number(line, "frequency", fields[2])?,
                size_bytes: parse_number(line, "size", fields[3])?,
                qos: parse_qos(line, &fields[4..8])?,
            }),
            Section::Subscribers => self.scenario.subscribers.push(SubscriberRecord {
                role: fields[0].to_string(),
                subscription: fields[1].to_string(),
                qos: parse_qos(line, &fields[2..6])?,
            }),
            Section::Robots => self.scenario.robots.push(parse_robot(line, fields)?),
            Section::Stations => {
                let params = parse_params(line, &fields[1..])?;
                self.scenario.stations.insert(fields[0].to_string(), params);
            }
            Section::Links => {
                let params = parse_params(line, &fields[1..])?;
                self.scenario.links.insert(fields[0].to_string(), params);
            }
            Section::PropagationModel => {
                let params = parse_params(line, fields)?;
                self.scenario.propagation_model.extend(params);
            }
            Section::MobilityModel => {
                let params = parse_params(line, fields)?;
                self.scenario.mobility_model.extend(params);
            }
            Section::Header => unreachable!("rows in Header are rejected above"),
        }

        Ok(())
    }

    pub fn finish(self) -> Scenario {
        self.scenario
    }
}

/// Parse a scenario table from any reader
pub fn parse_scenario<R: Read>(input: R) -> Result<Scenario, ScenarioError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut reader = ScenarioReader::new();
    for result in rdr.records() {
        let record = result.map_err(|e| ScenarioError::Unreadable {
            line: e.position().map(|p| p.line()).unwrap_or(0),
            message: e.to_string(),
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let fields: Vec<&str> = record.iter().collect();
        reader.feed(line, &fields)?;
    }

    Ok(reader.finish())
}

/// Read and parse a scenario file
pub fn read_scenario(path: &Path) -> Result<Scenario> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open scenario file: {}", path.display()))?;
    let scenario = parse_scenario(file)
        .with_context(|| format!("Invalid scenario file: {}", path.display()))?;

    log::info!(
        "Scenario {}: {} publishers, {} subscribers, {} robots, {} stations",
        path.display(),
        scenario.publishers.len(),
        scenario.subscribers.len(),
        scenario.robots.len(),
        scenario.stations.len()
    );
    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "\
# search and rescue
Publishers
Role,Subscription,Frequency,Size,History,Depth,Reliability,Durability
scout,odom,10,1024,keep_last,10,reliable,volatile
base,cmd,1,64,keep_all,0,best_effort,transient_local
Subscribers
Role,Subscription,History,Depth,Reliability,Durability
base,odom,keep_last,10,reliable,volatile
scout,cmd,keep_last,5,best_effort,volatile
Robots
Name,Role,X,Y,Z,Moves
r1,scout,0,0,0,true
r2,scout,10.5,0,0,true
b1,base,5,5,0,false,,
";

    #[test]
    fn test_parse_example() {
        let scenario = parse_scenario(EXAMPLE.as_bytes()).unwrap();
        assert_eq!(scenario.publishers.len(), 2);
        assert_eq!(scenario.subscribers.len(), 2);
        assert_eq!(scenario.robots.len(), 3);

        let odom = &scenario.publishers[0];
        assert_eq!(odom.frequency_hz, 10);
        assert_eq!(odom.size_bytes, 1024);
        assert_eq!(odom.qos.history, History::KeepLast);
        assert_eq!(scenario.publishers[1].qos.durability, Durability::TransientLocal);
        assert_eq!(scenario.robots[1].position.map(|p| p.x), Some(10.5));
        assert_eq!(scenario.robots[2].moves, Some(false));
        assert!(scenario.stations.is_empty());
    }

    #[test]
    fn test_parse_station_layout() {
        let table = "\
Robots
Name,Role
r1,scout
b1,base
Stations
Name,param:value
r1,position:0;0;0,range:50
b1,position:10;0;0
Links
Name,param:value
r1,bw:11,delay:5ms
Propagation Model
param:value
model:logDistance,exp:4
Mobility Model
model:RandomDirection
seed:20
";
        let scenario = parse_scenario(table.as_bytes()).unwrap();

        assert_eq!(scenario.robots.len(), 2);
        assert_eq!(scenario.robots[0].role, "scout");
        assert!(scenario.robots[0].position.is_none());
        assert!(scenario.robots[0].moves.is_none());

        let r1 = &scenario.stations["r1"];
        assert_eq!(r1["position"], ParamValue::Text("0,0,0".to_string()));
        assert_eq!(r1["range"], ParamValue::Number(50.0));
        assert_eq!(scenario.links["r1"]["delay"], ParamValue::Text("5ms".to_string()));
        assert_eq!(scenario.propagation_model["exp"], ParamValue::Number(4.0));
        assert_eq!(scenario.mobility_model.len(), 2);
        assert_eq!(scenario.mobility_model["seed"], ParamValue::Number(20.0));
        assert!(scenario.warnings().is_empty());
    }

    #[test]
    fn test_bad_param_cell() {
        let table = "Stations\nr1,position\n";
        assert!(matches!(
            parse_scenario(table.as_bytes()),
            Err(ScenarioError::InvalidValue { line: 2, field: "param:value cell", .. })
        ));

        let table = "Robots\nr1,scout,0,0\n";
        assert!(matches!(
            parse_scenario(table.as_bytes()),
            Err(ScenarioError::FieldCount { expected: "2 or 6", found: 4, .. })
        ));
    }

    #[test]
    fn test_station_for_unknown_robot_warns() {
        let scenario = parse_scenario("Robots\nr1,scout\nStations\nr9,range:5\n".as_bytes()).unwrap();
        assert_eq!(scenario.warnings(), vec!["Station entry 'r9' does not name a robot".to_string()]);
    }

    #[test]
    fn test_recipients_and_expected_flows() {
        let scenario = parse_scenario(EXAMPLE.as_bytes()).unwrap();

        let recipients = scenario.recipients();
        assert_eq!(recipients["odom"], vec!["b1".to_string()]);
        assert_eq!(recipients["cmd"], vec!["r1".to_string(), "r2".to_string()]);

        let flows = scenario.expected_flows();
        assert_eq!(flows.len(), 4);
        assert!(flows.contains(&Flow::new("r1", "b1", "odom")));
        assert!(flows.contains(&Flow::new("b1", "r2", "cmd")));
        assert!(scenario.warnings().is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let mut reader = ScenarioReader::new();
        assert_eq!(reader.state(), Section::Header);
        reader.feed(1, &["Robots"]).unwrap();
        assert_eq!(reader.state(), Section::Robots);
        reader.feed(2, &["Subscribers"]).unwrap();
        assert_eq!(reader.state(), Section::Subscribers);

        assert_eq!(
            reader.feed(3, &["Robots"]),
            Err(ScenarioError::InvalidTransition {
                line: 3,
                from: Section::Subscribers,
                to: Section::Robots,
            })
        );
    }

    #[test]
    fn test_row_outside_section() {
        let err = parse_scenario("scout,odom,10,1024,keep_last,10,reliable,volatile\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ScenarioError::RowOutsideSection { line: 1, .. }));
    }

    #[test]
    fn test_invalid_values() {
        let bad_qos = "Subscribers\nbase,odom,keep_some,10,reliable,volatile\n";
        assert!(matches!(
            parse_scenario(bad_qos.as_bytes()),
            Err(ScenarioError::InvalidValue { line: 2, field: "history policy", .. })
        ));

        let bad_moves = "Robots\nr1,scout,0,0,0,maybe\n";
        assert!(matches!(
            parse_scenario(bad_moves.as_bytes()),
            Err(ScenarioError::InvalidValue { field: "moves", .. })
        ));

        let short = "Publishers\nscout,odom,10\n";
        assert!(matches!(
            parse_scenario(short.as_bytes()),
            Err(ScenarioError::FieldCount { expected: "8", found: 3, .. })
        ));
    }

    #[test]
    fn test_warnings() {
        let scenario = parse_scenario("Publishers\nghost,odom,10,8,keep_last,1,reliable,volatile\n".as_bytes()).unwrap();
        let warnings = scenario.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("no subscribing robot"));
    }
}
