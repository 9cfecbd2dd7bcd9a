//! OS catalog: which base images instances can be created from.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One bootable OS image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OsImage {
    /// Display name.
    pub name: String,
    /// Source URL of the cloud image.
    pub image_url: String,
    /// Login user created by the image's first-boot tooling.
    pub default_user: String,
}

impl OsImage {
    fn new(name: &str, image_url: &str, default_user: &str) -> Self {
        Self {
            name: name.to_string(),
            image_url: image_url.to_string(),
            default_user: default_user.to_string(),
        }
    }
}

/// Static table of OS identifier to image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Catalog(BTreeMap<String, OsImage>);

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Catalog {
    /// Cloud images known out of the box.
    pub fn builtin() -> Self {
        let entries = [
            (
                "ubuntu22",
                OsImage::new(
                    "Ubuntu 22.04 LTS",
                    "https://cloud-images.ubuntu.com/jammy/current/jammy-server-cloudimg-amd64.img",
                    "ubuntu",
                ),
            ),
            (
                "ubuntu24",
                OsImage::new(
                    "Ubuntu 24.04 LTS",
                    "https://cloud-images.ubuntu.com/noble/current/noble-server-cloudimg-amd64.img",
                    "ubuntu",
                ),
            ),
            (
                "debian11",
                OsImage::new(
                    "Debian 11 (Bullseye)",
                    "https://cloud.debian.org/images/cloud/bullseye/latest/debian-11-generic-amd64.qcow2",
                    "debian",
                ),
            ),
            (
                "debian12",
                OsImage::new(
                    "Debian 12 (Bookworm)",
                    "https://cloud.debian.org/images/cloud/bookworm/latest/debian-12-generic-amd64.qcow2",
                    "debian",
                ),
            ),
            (
                "fedora40",
                OsImage::new(
                    "Fedora 40",
                    "https://download.fedoraproject.org/pub/fedora/linux/releases/40/Cloud/x86_64/images/Fedora-Cloud-Base-40-1.14.x86_64.qcow2",
                    "fedora",
                ),
            ),
            (
                "centos9",
                OsImage::new(
                    "CentOS Stream 9",
                    "https://cloud.centos.org/centos/9-stream/x86_64/images/CentOS-Stream-GenericCloud-9-latest.x86_64.qcow2",
                    "centos",
                ),
            ),
            (
                "alma9",
                OsImage::new(
                    "AlmaLinux 9",
                    "https://repo.almalinux.org/almalinux/9/cloud/x86_64/images/AlmaLinux-9-GenericCloud-latest.x86_64.qcow2",
                    "alma",
                ),
            ),
            (
                "rocky9",
                OsImage::new(
                    "Rocky Linux 9",
                    "https://download.rockylinux.org/pub/rocky/9/images/x86_64/Rocky-9-GenericCloud.latest.x86_64.qcow2",
                    "rocky",
                ),
            ),
        ];
        Self(
            entries
                .into_iter()
                .map(|(id, image)| (id.to_string(), image))
                .collect(),
        )
    }

    /// Build a catalog from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, OsImage)>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// Look up an OS by identifier.
    pub fn get(&self, os_type: &str) -> Result<&OsImage> {
        self.0
            .get(os_type)
            .ok_or_else(|| Error::UnknownOs(os_type.to_string()))
    }

    /// Whether the identifier is known.
    pub fn contains(&self, os_type: &str) -> bool {
        self.0.contains_key(os_type)
    }

    /// Iterate entries in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OsImage)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no OS is configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
