use anyhow::{Context, Result};
use reqwest::{Url, blocking::Client, header::ACCEPT};
use serde::Deserialize;
use tracing::debug;

use crate::package::{PackageName, Requirement, WheelFilename};

/// The JSON flavour of the Simple Repository API (PEP 691).
pub const CONTENT_TYPE: &str = "application/vnd.pypi.simple.v1+json";

/// A project page.
#[derive(Debug, Deserialize)]
pub struct Project {
    pub name: String,
    pub files: Vec<ProjectFile>,
}

/// One distribution file of a project.
#[derive(Debug, Deserialize)]
pub struct ProjectFile {
    pub filename: String,
    /// Possibly relative to the project page.
    pub url: String,
    #[serde(default)]
    pub yanked: Yanked,
}

/// `yanked` is either a flag or the reason for yanking.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Yanked {
    Flag(bool),
    Reason(String),
}

impl Default for Yanked {
    fn default() -> Self {
        Self::Flag(false)
    }
}

impl Yanked {
    pub const fn is_yanked(&self) -> bool {
        !matches!(self, Self::Flag(false))
    }
}

/// Downloads the project page of `name` from the index at `index`, returning the page URL
/// (which file URLs are relative to) and its contents.
pub fn fetch_project(client: &Client, index: &Url, name: &PackageName) -> Result<(Url, Project)> {
    let page = index.join(&format!("{name}/"))?;
    let project: Project = client
        .get(page.clone())
        .header(ACCEPT, CONTENT_TYPE)
        .send()?
        .error_for_status()?
        .json()
        .with_context(|| format!("Failed to parse the project page for {name}"))?;

    debug!(project = %project.name, files = project.files.len(), "fetched project page");
    Ok((page, project))
}

/// The newest wheel of `project` allowed by `requirement`, skipping yanked files.
pub fn best_wheel(page: &Url, project: Project, requirement: &Requirement) -> Result<Url> {
    let (_, url) = project
        .files
        .into_iter()
        .filter(|file| {
            if let Yanked::Reason(reason) = &file.yanked {
                debug!(file = %file.filename, %reason, "skipping yanked file");
            }
            !file.yanked.is_yanked()
        })
        .filter_map(|file| {
            let wheel = file.filename.parse::<WheelFilename>().ok()?;
            requirement
                .allows(&wheel.version)
                .then_some((wheel.version, file.url))
        })
        .max_by(|(left, _), (right, _)| left.cmp(right))
        .with_context(|| format!("No wheel found for {requirement}"))?;

    Ok(page.join(&url)?)
}

/// Resolves `requirement` to the URL of a wheel.
pub fn find_wheel(client: &Client, index: &Url, requirement: &Requirement) -> Result<Url> {
    let (page, project) = fetch_project(client, index, requirement.name())?;
    best_wheel(&page, project, requirement)
}
