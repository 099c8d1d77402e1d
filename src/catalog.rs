//! Community and project catalog.
//!
//! A small static table of Dubai communities and the real estate projects in
//! them, standing in for a property database. Extra entries can be merged in
//! from the `[catalog]` section of the config file.
//!
//! Lookups are case-insensitive on the community name.

use serde::Serialize;

use crate::config::CatalogConfig;
use crate::models::LatLng;

/// A project inside a community.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub name: String,
    pub project_type: String,
    pub position: LatLng,
}

/// A named community with a representative coordinate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Community {
    pub name: String,
    pub position: LatLng,
    pub projects: Vec<Project>,
}

/// Lookup table of communities.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    communities: Vec<Community>,
}

fn project(name: &str, project_type: &str, lat: f64, lng: f64) -> Project {
    Project {
        name: name.to_string(),
        project_type: project_type.to_string(),
        position: LatLng::new(lat, lng),
    }
}

fn community(name: &str, lat: f64, lng: f64, projects: Vec<Project>) -> Community {
    Community {
        name: name.to_string(),
        position: LatLng::new(lat, lng),
        projects,
    }
}

impl Catalog {
    /// The built-in Dubai catalog.
    pub fn builtin() -> Self {
        Self {
            communities: vec![
                community(
                    "Dubai Hills Estate",
                    25.1118,
                    55.2575,
                    vec![
                        project("Maple at Dubai Hills", "Villas", 25.1050, 55.2600),
                        project("Park Heights", "Apartments", 25.1150, 55.2550),
                        project("Golfville", "Off-plan", 25.1100, 55.2590),
                    ],
                ),
                community(
                    "Palm Jumeirah",
                    25.1189,
                    55.1383,
                    vec![
                        project("The Palm Tower", "Apartments", 25.1118, 55.1495),
                        project("XXII Carat", "Villas", 25.1025, 55.1275),
                    ],
                ),
                community(
                    "Downtown Dubai",
                    25.1972,
                    55.2744,
                    vec![
                        project("Burj Khalifa Residences", "Apartments", 25.1972, 55.2744),
                        project("The Address Downtown", "Apartments", 25.1945, 55.2787),
                        project("Grande Opera District", "Off-plan", 25.1930, 55.2760),
                    ],
                ),
                community(
                    "Dubai Marina",
                    25.0784,
                    55.1384,
                    vec![
                        project("Marina Gate", "Apartments", 25.0870, 55.1470),
                        project("Address Beach Resort", "Apartments", 25.0780, 55.1330),
                    ],
                ),
                community("Arabian Ranches", 25.0683, 55.2515, Vec::new()),
            ],
        }
    }

    /// The built-in catalog with the config's extra entries merged in.
    ///
    /// An extra community whose name matches an existing one replaces its
    /// coordinate and appends its projects.
    pub fn from_config(config: &CatalogConfig) -> Self {
        let mut catalog = if config.include_builtin {
            Self::builtin()
        } else {
            Self::default()
        };

        for extra in &config.communities {
            let projects: Vec<Project> = extra
                .projects
                .iter()
                .map(|p| project(&p.name, &p.project_type, p.lat, p.lng))
                .collect();

            let key = extra.name.to_lowercase();
            match catalog
                .communities
                .iter_mut()
                .find(|c| c.name.to_lowercase() == key)
            {
                Some(existing) => {
                    existing.position = LatLng::new(extra.lat, extra.lng);
                    existing.projects.extend(projects);
                }
                None => catalog
                    .communities
                    .push(community(&extra.name, extra.lat, extra.lng, projects)),
            }
        }

        catalog
    }

    pub fn communities(&self) -> &[Community] {
        &self.communities
    }

    /// Case-insensitive community lookup.
    pub fn find_community(&self, name: &str) -> Option<&Community> {
        let key = name.to_lowercase();
        self.communities
            .iter()
            .find(|c| c.name.to_lowercase() == key)
    }

    /// Projects of a community, or `None` when the catalog holds no project
    /// data for it.
    pub fn projects_in(&self, community_name: &str) -> Option<&[Project]> {
        self.find_community(community_name)
            .map(|c| c.projects.as_slice())
            .filter(|projects| !projects.is_empty())
    }

    /// Two community names to suggest when a lookup misses.
    pub fn suggestions(&self) -> (&str, &str) {
        let builtin_pair = ("Dubai Hills Estate", "Downtown Dubai");
        if self.find_community(builtin_pair.0).is_some()
            && self.find_community(builtin_pair.1).is_some()
        {
            return builtin_pair;
        }
        match self.communities.as_slice() {
            [first, second, ..] => (first.name.as_str(), second.name.as_str()),
            _ => builtin_pair,
        }
    }
}

/// Projects whose type contains `project_type`, ignoring case.
pub fn filter_by_type<'a>(projects: &'a [Project], project_type: &str) -> Vec<&'a Project> {
    let needle = project_type.to_lowercase();
    projects
        .iter()
        .filter(|p| p.project_type.to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtraCommunity, ExtraProject};

    #[test]
    fn test_find_community_ignores_case() {
        let catalog = Catalog::builtin();
        let c = catalog.find_community("dUBAI hills ESTATE").unwrap();
        assert_eq!(c.position, LatLng::new(25.1118, 55.2575));
        assert!(catalog.find_community("Atlantis").is_none());
    }

    #[test]
    fn test_projects_in_community_without_data() {
        let catalog = Catalog::builtin();
        assert!(catalog.find_community("Arabian Ranches").is_some());
        assert!(catalog.projects_in("Arabian Ranches").is_none());
        assert_eq!(catalog.projects_in("Dubai Marina").unwrap().len(), 2);
    }

    #[test]
    fn test_filter_by_type_substring() {
        let catalog = Catalog::builtin();
        let projects = catalog.projects_in("Dubai Hills Estate").unwrap();
        let villas = filter_by_type(projects, "villa");
        assert_eq!(villas.len(), 1);
        assert_eq!(villas[0].name, "Maple at Dubai Hills");
        assert!(filter_by_type(projects, "Townhouse").is_empty());
        assert_eq!(filter_by_type(projects, "").len(), 3);
    }

    #[test]
    fn test_from_config_merges_extras() {
        let config = CatalogConfig {
            include_builtin: true,
            communities: vec![
                ExtraCommunity {
                    name: "Arabian Ranches".to_string(),
                    lat: 25.07,
                    lng: 55.25,
                    projects: vec![ExtraProject {
                        name: "Saheel".to_string(),
                        project_type: "Villas".to_string(),
                        lat: 25.05,
                        lng: 55.26,
                    }],
                },
                ExtraCommunity {
                    name: "Jumeirah Village Circle".to_string(),
                    lat: 25.06,
                    lng: 55.21,
                    projects: Vec::new(),
                },
            ],
        };

        let catalog = Catalog::from_config(&config);
        assert_eq!(catalog.communities().len(), 6);
        assert_eq!(catalog.projects_in("arabian ranches").unwrap().len(), 1);
        assert!(catalog.find_community("Jumeirah Village Circle").is_some());
    }

    #[test]
    fn test_suggestions_fall_back_to_first_entries() {
        let config = CatalogConfig {
            include_builtin: false,
            communities: vec![
                ExtraCommunity {
                    name: "A".to_string(),
                    lat: 0.0,
                    lng: 0.0,
                    projects: Vec::new(),
                },
                ExtraCommunity {
                    name: "B".to_string(),
                    lat: 1.0,
                    lng: 1.0,
                    projects: Vec::new(),
                },
            ],
        };
        assert_eq!(Catalog::from_config(&config).suggestions(), ("A", "B"));
        assert_eq!(
            Catalog::builtin().suggestions(),
            ("Dubai Hills Estate", "Downtown Dubai")
        );
    }
}
