//! Route reference data.
//!
//! A route is a fixed, ordered list of stops. Trips read it but never own it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stop {
    pub id: u32,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    id: String,
    name: String,
    stops: Vec<Stop>,
}

impl Route {
    /// Builds a route. A route without stops can never be completed, so it is
    /// rejected, as are repeated stop ids.
    pub fn new(id: &str, name: &str, stops: Vec<Stop>) -> Option<Self> {
        if id.trim().is_empty() || stops.is_empty() {
            return None;
        }
        let mut ids: Vec<u32> = stops.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != stops.len() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            name: name.to_string(),
            stops,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn total_stops(&self) -> usize {
        self.stops.len()
    }

    pub fn stop(&self, index: usize) -> Option<&Stop> {
        self.stops.get(index)
    }
}

impl Default for Route {
    /// The Engineering Loop, the campus's default driver route.
    fn default() -> Self {
        let stop = |id: u32, name: &str, address: &str| Stop {
            id,
            name: name.to_string(),
            address: address.to_string(),
        };
        Self {
            id: "route5".to_string(),
            name: "Engineering Loop".to_string(),
            stops: vec![
                stop(1, "Main Gate", "College entrance"),
                stop(2, "Library", "Central Library"),
                stop(3, "Science Block", "Near Labs"),
                stop(4, "Medical Center", "Hospital campus"),
                stop(5, "Admin Block", "Main office"),
                stop(6, "Engineering Block", "Tech campus"),
                stop(7, "Hostel Gate", "Depot return"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_route_has_seven_ordered_stops() {
        let route = Route::default();
        assert_eq!(route.total_stops(), 7);
        assert_eq!(route.stop(0).unwrap().name, "Main Gate");
        assert_eq!(route.stop(6).unwrap().name, "Hostel Gate");
        assert!(route.stop(7).is_none());
    }

    #[test]
    fn rejects_empty_and_duplicate_routes() {
        assert!(Route::new("r", "Empty", vec![]).is_none());
        let dup = vec![
            Stop {
                id: 1,
                name: "A".into(),
                address: String::new(),
            },
            Stop {
                id: 1,
                name: "B".into(),
                address: String::new(),
            },
        ];
        assert!(Route::new("r", "Dup", dup).is_none());
    }
}
