//! Role-filtered navigation menu for the portal shell.

use serde::Serialize;

use crate::models::Role;

const BOTH: &[Role] = &[Role::Patient, Role::Doctor];
const DOCTOR: &[Role] = &[Role::Doctor];
const PATIENT: &[Role] = &[Role::Patient];

struct MenuEntry {
    label: &'static str,
    path: &'static str,
    roles: &'static [Role],
    children: &'static [MenuEntry],
}

const MENU: &[MenuEntry] = &[
    MenuEntry { label: "Dashboard", path: "/dashboard", roles: BOTH, children: &[] },
    MenuEntry {
        label: "Appointments",
        path: "/appointments",
        roles: BOTH,
        children: &[
            MenuEntry { label: "Schedule", path: "/appointments/schedule", roles: DOCTOR, children: &[] },
            MenuEntry { label: "Requests", path: "/appointments/requests", roles: DOCTOR, children: &[] },
            MenuEntry { label: "Book", path: "/appointments/book", roles: PATIENT, children: &[] },
            MenuEntry { label: "History", path: "/appointments/history", roles: BOTH, children: &[] },
        ],
    },
    MenuEntry { label: "Messages", path: "/messages", roles: BOTH, children: &[] },
    MenuEntry { label: "Medical Records", path: "/records", roles: PATIENT, children: &[] },
    MenuEntry { label: "My Patients", path: "/patients", roles: DOCTOR, children: &[] },
    MenuEntry { label: "Profile", path: "/profile", roles: BOTH, children: &[] },
];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NavItem {
    pub label: &'static str,
    pub href: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NavItem>,
}

fn build(entries: &[MenuEntry], role: Role) -> Vec<NavItem> {
    entries
        .iter()
        .filter(|e| e.roles.contains(&role))
        .map(|e| NavItem {
            label: e.label,
            href: format!("/{}{}", role.as_str(), e.path),
            children: build(e.children, role),
        })
        .collect()
}

pub fn nav_for(role: Role) -> Vec<NavItem> {
    build(MENU, role)
}

/// Where a signed-in user lands.
pub fn home_path(role: Role) -> String {
    format!("/{}/dashboard", role.as_str())
}
