// Structural guarantees of the chassis document: add/remove/rename shapes,
// error ordering, and byte stability of the text around every edit.
mod support;

use anyhow::Result;
use chassis::{Chassis, ChassisError};
use pretty_assertions::assert_eq;
use serde_yaml::Value;
use support::{HAND_EDITED_CHASSIS, SAMPLE_CHASSIS, Workspace};

fn reparsed(chassis: &Chassis) -> Result<Value> {
    Ok(serde_yaml::from_str(&chassis.to_yaml_string())?)
}

#[test]
fn add_to_empty_document_creates_the_ancestor_chain() -> Result<()> {
    for target in [
        "platform",
        "platform.foundation",
        "platform.foundation.cluster",
        "platform.foundation.cluster.control",
        "platform.foundation.cluster.control.etcd",
    ] {
        let mut chassis = Chassis::new();
        chassis.add(target)?;
        assert!(chassis.exists(target));

        let mut expected: Vec<String> = chassis
            .ancestors(target)
            .into_iter()
            .rev()
            .collect();
        expected.push(target.to_string());
        assert_eq!(chassis.flatten(), expected, "adding {target}");
    }
    Ok(())
}

#[test]
fn add_to_empty_document_uses_chassis_shapes() -> Result<()> {
    let mut chassis = Chassis::new();
    chassis.add("platform.foundation.cluster.control")?;
    let expected: Value = serde_yaml::from_str(
        "platform:\n  foundation:\n    - cluster:\n        - control\n",
    )?;
    assert_eq!(reparsed(&chassis)?, expected);
    assert_eq!(
        chassis.to_yaml_string(),
        "platform:\n  foundation:\n    - cluster:\n        - control\n"
    );
    Ok(())
}

#[test]
fn remove_undoes_add_of_a_new_leaf() -> Result<()> {
    let mut chassis = Chassis::parse(SAMPLE_CHASSIS)?;
    let before = chassis.flatten();
    chassis.add("platform.interaction.portal")?;
    assert!(chassis.exists("platform.interaction.portal"));
    chassis.remove("platform.interaction.portal")?;
    assert_eq!(chassis.flatten(), before);
    assert_eq!(chassis.to_yaml_string(), SAMPLE_CHASSIS);
    Ok(())
}

#[test]
fn remove_takes_the_subtree() -> Result<()> {
    let mut chassis = Chassis::parse(SAMPLE_CHASSIS)?;
    chassis.remove("platform.foundation.cluster")?;
    assert_eq!(
        chassis.flatten(),
        vec![
            "platform",
            "platform.foundation",
            "platform.foundation.storage",
            "platform.interaction",
            "platform.interaction.legacy",
            "platform.interaction.gateway",
        ]
    );
    let err = chassis.remove("platform.foundation.cluster").unwrap_err();
    assert!(matches!(err, ChassisError::NotFound(_)), "{err}");
    Ok(())
}

#[test]
fn removing_the_only_child_leaves_an_empty_container() -> Result<()> {
    let mut chassis = Chassis::parse("platform:\n  foundation:\n    - cluster:\n        - control\n")?;
    chassis.remove("platform.foundation.cluster.control")?;
    let expected: Value =
        serde_yaml::from_str("platform:\n  foundation:\n    - cluster: []\n")?;
    assert_eq!(reparsed(&chassis)?, expected);
    assert_eq!(
        chassis.to_yaml_string(),
        "platform:\n  foundation:\n    - cluster: []\n"
    );
    Ok(())
}

#[test]
fn rename_there_and_back_is_byte_stable() -> Result<()> {
    let mut chassis = Chassis::parse(HAND_EDITED_CHASSIS)?;
    chassis.rename("platform.interaction.legacy", "platform.interaction.old")?;
    assert_eq!(
        chassis.to_yaml_string(),
        HAND_EDITED_CHASSIS.replace("- legacy", "- old")
    );
    chassis.rename("platform.interaction.old", "platform.interaction.legacy")?;
    assert_eq!(chassis.to_yaml_string(), HAND_EDITED_CHASSIS);

    chassis.rename("platform.foundation.cluster", "platform.foundation.core")?;
    assert_eq!(
        chassis.to_yaml_string(),
        HAND_EDITED_CHASSIS.replace("- cluster:", "- core:")
    );
    Ok(())
}

#[test]
fn renamed_scalars_keep_their_kind_and_quoting() -> Result<()> {
    let source = "releases:\n  - 2024\n  - '2025'   # pinned\n  - \"lts\"\n";
    let mut chassis = Chassis::parse(source)?;
    chassis.rename("releases.2024", "releases.2023")?;
    chassis.rename("releases.2025", "releases.2026")?;
    chassis.rename("releases.lts", "releases.edge")?;
    assert_eq!(
        chassis.to_yaml_string(),
        "releases:\n  - 2023\n  - '2026'   # pinned\n  - \"edge\"\n"
    );
    let reread: Value = serde_yaml::from_str(&chassis.to_yaml_string())?;
    assert!(reread["releases"][0].is_u64());
    assert!(reread["releases"][1].is_string());

    chassis.rename("releases.2023", "releases.2024")?;
    chassis.rename("releases.2026", "releases.2025")?;
    chassis.rename("releases.edge", "releases.lts")?;
    assert_eq!(chassis.to_yaml_string(), source);
    Ok(())
}

#[test]
fn adds_splice_into_hand_edited_text() -> Result<()> {
    let mut chassis = Chassis::parse(HAND_EDITED_CHASSIS)?;
    chassis.add("platform.interaction.portal")?;
    let expected = format!("{HAND_EDITED_CHASSIS}        - portal\n");
    assert_eq!(chassis.to_yaml_string(), expected);

    chassis.add("platform.foundation.storage.ceph")?;
    let expected = expected.replace(
        "        - storage\n",
        "        - storage:\n            - ceph\n",
    );
    assert_eq!(chassis.to_yaml_string(), expected);

    chassis.add("platform.foundation.cluster.etcd")?;
    let expected = expected.replace(
        "              - workers\n",
        "              - workers\n              - etcd\n",
    );
    assert_eq!(chassis.to_yaml_string(), expected);

    chassis.add("lab.rack")?;
    assert_eq!(chassis.to_yaml_string(), format!("{expected}lab:\n  rack: []\n"));
    Ok(())
}

#[test]
fn removes_cut_only_the_target_lines() -> Result<()> {
    let mut chassis = Chassis::parse(HAND_EDITED_CHASSIS)?;
    chassis.remove("platform.foundation.cluster.control")?;
    assert_eq!(
        chassis.to_yaml_string(),
        HAND_EDITED_CHASSIS.replace("              - control\n", "")
    );

    let mut chassis = Chassis::parse(HAND_EDITED_CHASSIS)?;
    chassis.remove("platform.foundation.storage")?;
    assert_eq!(
        chassis.to_yaml_string(),
        HAND_EDITED_CHASSIS.replace("        - storage\n", "")
    );

    let mut chassis = Chassis::parse(HAND_EDITED_CHASSIS)?;
    chassis.remove("platform.foundation.cluster")?;
    assert_eq!(
        chassis.to_yaml_string(),
        HAND_EDITED_CHASSIS.replace(
            "        - cluster:   # etcd lives here\n              - control\n              - workers\n",
            ""
        )
    );

    chassis.remove("platform.interaction")?;
    assert_eq!(
        chassis.to_yaml_string(),
        "# Platform chassis. Edited by hand; keep the comments.\nplatform:\n    foundation:\n        - storage\n    # customer facing\n"
    );
    Ok(())
}

#[test]
fn group_entries_sharing_an_item_are_removed_alone() -> Result<()> {
    let source = "platform:\n  foundation:\n    - cluster:\n        - control\n      storage:\n        - ceph\n";
    let mut chassis = Chassis::parse(source)?;
    chassis.remove("platform.foundation.cluster")?;
    assert_eq!(
        chassis.to_yaml_string(),
        "platform:\n  foundation:\n    - storage:\n        - ceph\n"
    );

    let mut chassis = Chassis::parse(source)?;
    chassis.remove("platform.foundation.storage")?;
    assert_eq!(
        chassis.to_yaml_string(),
        "platform:\n  foundation:\n    - cluster:\n        - control\n"
    );
    Ok(())
}

#[test]
fn second_add_fails_and_leaves_document_unchanged() -> Result<()> {
    let mut chassis = Chassis::parse(SAMPLE_CHASSIS)?;
    chassis.add("platform.foundation.edge")?;
    let after_first = chassis.to_yaml_string();
    assert_eq!(
        after_first,
        SAMPLE_CHASSIS.replace("    - storage\n", "    - storage\n    - edge\n")
    );
    let err = chassis.add("platform.foundation.edge").unwrap_err();
    assert!(matches!(err, ChassisError::AlreadyExists(ref p) if p == "platform.foundation.edge"));
    assert_eq!(chassis.to_yaml_string(), after_first);
    Ok(())
}

#[test]
fn rename_rejects_depth_and_multi_segment_changes() -> Result<()> {
    let mut chassis = Chassis::parse("platform:\n  a:\n    - b\n")?;
    let err = chassis.rename("platform.a.b", "platform.x.b.c").unwrap_err();
    assert!(matches!(err, ChassisError::DepthMismatch { .. }), "{err}");
    let err = chassis.rename("platform.a.b", "platform.x.y").unwrap_err();
    assert!(
        matches!(err, ChassisError::AmbiguousRename { ref positions, .. } if positions == &vec![1, 2]),
        "{err}"
    );
    let err = chassis.rename("platform.a.b", "platform.a.b").unwrap_err();
    assert!(matches!(err, ChassisError::IdenticalPath(_)), "{err}");
    let err = chassis.rename("platform.a.zz", "platform.a.yy").unwrap_err();
    assert!(matches!(err, ChassisError::NotFound(_)), "{err}");
    let err = chassis.rename("platform..b", "platform.a.c").unwrap_err();
    assert!(matches!(err, ChassisError::InvalidPath { .. }), "{err}");
    Ok(())
}

#[test]
fn marker_becomes_group_in_place() -> Result<()> {
    let mut chassis = Chassis::parse("platform:\n  interaction:\n    - legacy\n    - gateway\n")?;
    chassis.add("platform.interaction.legacy.bridge")?;
    assert_eq!(
        chassis.flatten(),
        vec![
            "platform",
            "platform.interaction",
            "platform.interaction.legacy",
            "platform.interaction.legacy.bridge",
            "platform.interaction.gateway",
        ]
    );
    let expected: Value = serde_yaml::from_str(
        "platform:\n  interaction:\n    - legacy:\n        - bridge\n    - gateway\n",
    )?;
    assert_eq!(reparsed(&chassis)?, expected);
    assert_eq!(
        chassis.to_yaml_string(),
        "platform:\n  interaction:\n    - legacy:\n        - bridge\n    - gateway\n"
    );
    Ok(())
}

#[test]
fn invalid_paths_are_rejected_before_mutation() -> Result<()> {
    let mut chassis = Chassis::parse(SAMPLE_CHASSIS)?;
    let before = chassis.to_yaml_string();
    for raw in ["", "platform.", ".platform", "platform..foundation"] {
        let err = chassis.add(raw).unwrap_err();
        assert!(matches!(err, ChassisError::InvalidPath { .. }), "{raw:?}: {err}");
    }
    assert_eq!(chassis.to_yaml_string(), before);
    Ok(())
}

#[test]
fn end_to_end_add_then_rename() -> Result<()> {
    let workspace = Workspace::new("platform: {foundation: [cluster]}\n")?;
    let mut chassis = Chassis::load(&workspace.document())?;
    chassis.add("platform.foundation.cluster.control")?;
    assert_eq!(
        chassis.flatten(),
        vec![
            "platform",
            "platform.foundation",
            "platform.foundation.cluster",
            "platform.foundation.cluster.control",
        ]
    );
    let err = chassis.add("platform.foundation.cluster.control").unwrap_err();
    assert!(matches!(err, ChassisError::AlreadyExists(_)));

    chassis.rename(
        "platform.foundation.cluster.control",
        "platform.foundation.cluster.mgmt",
    )?;
    chassis.save(&workspace.document())?;
    assert_eq!(
        workspace.read_document()?,
        "platform: {foundation: [{cluster: [mgmt]}]}\n"
    );

    let reloaded = Chassis::load(&workspace.document())?;
    assert!(reloaded.exists("platform.foundation.cluster.mgmt"));
    assert!(!reloaded.exists("platform.foundation.cluster.control"));
    Ok(())
}

#[test]
fn load_reports_malformed_documents() -> Result<()> {
    let workspace = Workspace::new("- platform\n- other\n")?;
    let err = Chassis::load(&workspace.document()).unwrap_err();
    assert!(matches!(err, ChassisError::DocumentParse { .. }), "{err}");

    let missing = workspace.root().join("absent.yaml");
    let err = Chassis::load(&missing).unwrap_err();
    assert!(matches!(err, ChassisError::DocumentRead { .. }), "{err}");

    assert!(Chassis::parse("platform:\n  a.b:\n    - c\n").is_err());
    assert!(Chassis::parse("")?.flatten().is_empty());
    Ok(())
}
