//! End-to-end resolution scenarios over an on-disk workspace store.

use std::{collections::BTreeMap, path::PathBuf, str::FromStr};

use brig_resolver::{
    DefaultContext, Error, Plan, PlanStep, ResolveOptions, Resolver, UserAction,
};
use brig_store::{AvailablePackage, ConfigurationType, SelectedPackage, Store};
use brig_types::{
    ConfigOrigin, PackageKey, PackageName, PackageState, PackageSubstate, Version,
    VersionConstraint, parse_dependency_group,
};
use testresult::TestResult;

fn init_logging() {
    let _ = simplelog::SimpleLogger::init(
        log::LevelFilter::Debug,
        simplelog::Config::default(),
    );
}

fn name(text: &str) -> PackageName {
    PackageName::from_str(text).unwrap()
}

fn version(text: &str) -> Version {
    Version::from_str(text).unwrap()
}

/// Builds an available package with the given `depends:` values.
fn available(package: &str, ver: &str, depends: &[&str]) -> AvailablePackage {
    AvailablePackage {
        name: name(package),
        version: version(ver),
        system: false,
        package_type: None,
        project: None,
        languages: Vec::new(),
        dependencies: depends
            .iter()
            .map(|d| parse_dependency_group(d).unwrap())
            .collect(),
        bootstrap_build: None,
        root_build: None,
        sha256sum: None,
        locations: Vec::new(),
    }
}

/// Builds a configured selected package.
fn configured(package: &str, ver: &str) -> SelectedPackage {
    SelectedPackage {
        name: name(package),
        version: version(ver),
        state: PackageState::Configured,
        substate: PackageSubstate::None,
        hold_package: false,
        hold_version: false,
        archive: None,
        src_root: Some(PathBuf::from(format!("{package}-{ver}"))),
        out_root: Some(PathBuf::from(format!("{package}-{ver}-out"))),
        prerequisites: BTreeMap::new(),
        alternatives: Vec::new(),
        config_variables: Vec::new(),
        config_checksum: String::new(),
        source_checksum: None,
    }
}

fn resolve(store: &mut Store, actions: &[UserAction]) -> Result<Plan, Error> {
    let mut ctx = DefaultContext;
    Resolver::new(store, &mut ctx, ResolveOptions::default()).resolve(actions)
}

fn resolve_with_yes(store: &mut Store, actions: &[UserAction]) -> Result<Plan, Error> {
    let mut ctx = DefaultContext;
    let options = ResolveOptions { yes: true };
    Resolver::new(store, &mut ctx, options).resolve(actions)
}

/// Renders a plan without the trailing newline, for snapshots.
fn rendered(plan: &Plan) -> String {
    plan.to_string().trim_end().to_string()
}

#[test]
fn simple_chain() -> TestResult {
    init_logging();
    let tmp = tempfile::tempdir()?;
    let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
    let config = store.self_uuid();

    store.insert_available_package(config, &available("libhello", "1.0.0", &[]))?;
    store.insert_available_package(config, &available("libhello", "1.0.1", &[]))?;
    store.insert_available_package(
        config,
        &available("hello", "1.0.0", &["libhello ^1.0.0"]),
    )?;

    let plan = resolve(&mut store, &[UserAction::build(name("hello"))])?;
    insta::assert_snapshot!("simple_chain_plan", rendered(&plan));

    // The dependent records its prerequisite with the constraint that
    // caused it.
    let configure_hello = plan
        .steps
        .iter()
        .find_map(|step| match step {
            PlanStep::Configure { key, data, .. } if key.name == name("hello") => Some(data),
            _ => None,
        })
        .expect("configure step for hello");
    assert_eq!(
        configure_hello
            .prerequisites
            .get(&PackageKey::new(config, name("libhello"))),
        Some(&Some(VersionConstraint::from_str("^1.0.0")?))
    );
    assert_eq!(configure_hello.alternatives, vec![1]);
    Ok(())
}

#[test]
fn constraint_tightening_restarts() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
    let config = store.self_uuid();

    for ver in ["1.0", "1.5", "2.0"] {
        store.insert_available_package(config, &available("libl", ver, &[]))?;
    }
    store.insert_available_package(config, &available("appa", "1.0", &["libl [1.0 3.0)"]))?;
    store.insert_available_package(config, &available("appb", "1.0", &["libl == 1.5"]))?;

    let plan = resolve(
        &mut store,
        &[
            UserAction::build(name("appa")),
            UserAction::build(name("appb")),
        ],
    )?;

    let rendered = plan.to_string();
    assert!(rendered.contains("fetch libl 1.5"), "{rendered}");
    assert!(rendered.contains("configure libl 1.5"), "{rendered}");
    assert!(!rendered.contains("libl 2.0"), "{rendered}");
    Ok(())
}

#[test]
fn alternative_with_configuration_clause() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
    let config = store.self_uuid();

    for lib in ["libfoo-bar", "libfoo-baz"] {
        store.insert_available_package(config, &available(lib, "1.0.0", &[]))?;
    }
    store.insert_available_package(
        config,
        &available(
            "foo",
            "1.0.0",
            &["libfoo-bar == 1.0.0 ? (!defined(config.foo.api)) \
               reflect { config.foo.api = 'bar' } \
               | libfoo-baz == 1.0.0 ? (!defined(config.foo.api)) \
               reflect { config.foo.api = 'baz' }"],
        ),
    )?;

    // libfoo-bar is already present as a prerequisite of another
    // selected package, which makes alternative 1 the used one.
    store.save_selected_package(config, &configured("libfoo-bar", "1.0.0"))?;
    let mut other = configured("other", "1.0.0");
    other
        .prerequisites
        .insert(PackageKey::new(config, name("libfoo-bar")), None);
    store.save_selected_package(config, &other)?;

    let plan = resolve(&mut store, &[UserAction::build(name("foo"))])?;

    let configure_foo = plan
        .steps
        .iter()
        .find_map(|step| match step {
            PlanStep::Configure { key, data, .. } if key.name == name("foo") => Some(data),
            _ => None,
        })
        .expect("configure step for foo");
    assert_eq!(configure_foo.alternatives, vec![1]);
    assert!(
        configure_foo
            .config
            .contains(&"config.foo.api=bar".to_string())
    );
    assert!(configure_foo.variables.iter().any(|variable| {
        variable.name == "config.foo.api" && variable.origin == ConfigOrigin::Reflect
    }));
    Ok(())
}

#[test]
fn cluster_merge_and_negotiation() -> TestResult {
    init_logging();
    let tmp = tempfile::tempdir()?;
    let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
    let config = store.self_uuid();

    let mut libshared = available("libshared", "1.0.0", &[]);
    libshared.root_build = Some("config.libshared.buf = 4".to_string());
    store.insert_available_package(config, &libshared)?;
    store.insert_available_package(
        config,
        &available(
            "pkgx",
            "1.0.0",
            &["libshared prefer { config.libshared.buf = max(config.libshared.buf, 8) } \
               accept (config.libshared.buf >= 8)"],
        ),
    )?;
    store.insert_available_package(
        config,
        &available(
            "pkgy",
            "1.0.0",
            &["libshared prefer { config.libshared.buf = max(config.libshared.buf, 16) } \
               accept (config.libshared.buf >= 16)"],
        ),
    )?;

    let plan = resolve(
        &mut store,
        &[
            UserAction::build(name("pkgx")),
            UserAction::build(name("pkgy")),
        ],
    )?;

    let configure_libshared = plan
        .steps
        .iter()
        .find_map(|step| match step {
            PlanStep::Configure { key, data, .. } if key.name == name("libshared") => Some(data),
            _ => None,
        })
        .expect("configure step for libshared");
    assert!(
        configure_libshared
            .config
            .contains(&"config.libshared.buf=16".to_string()),
        "{:?}",
        configure_libshared.config
    );
    assert!(configure_libshared.variables.iter().any(|variable| {
        variable.name == "config.libshared.buf" && variable.origin == ConfigOrigin::Dependent
    }));

    // The shared dependency is configured before either dependent.
    let position = |package: &str| {
        plan.steps
            .iter()
            .position(|step| {
                matches!(step, PlanStep::Configure { key, .. } if key.name == name(package))
            })
            .expect("configure step")
    };
    assert!(position("libshared") < position("pkgx"));
    assert!(position("libshared") < position("pkgy"));
    Ok(())
}

#[test]
fn resolution_is_deterministic() -> TestResult {
    let render = || -> Result<String, Box<dyn std::error::Error>> {
        let tmp = tempfile::tempdir()?;
        let mut store =
            Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
        let config = store.self_uuid();
        let mut libshared = available("libshared", "1.0.0", &[]);
        libshared.root_build = Some("config.libshared.buf = 4".to_string());
        store.insert_available_package(config, &libshared)?;
        store.insert_available_package(
            config,
            &available(
                "pkgx",
                "1.0.0",
                &["libshared require { config.libshared.extra = true }"],
            ),
        )?;
        store.insert_available_package(
            config,
            &available("pkgy", "1.0.0", &["libshared ^1.0.0"]),
        )?;
        let plan = resolve(
            &mut store,
            &[
                UserAction::build(name("pkgx")),
                UserAction::build(name("pkgy")),
            ],
        )?;
        Ok(plan.to_string())
    };
    assert_eq!(render().unwrap(), render().unwrap());
    Ok(())
}

#[test]
fn existing_dependent_optional_reevaluation() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
    let config = store.self_uuid();

    store.insert_available_package(config, &available("liblo", "1.0.0", &[]))?;
    store.insert_available_package(config, &available("liblo", "1.1.0", &[]))?;
    store.insert_available_package(config, &available("app", "1.0.0", &["liblo ^1.0.0"]))?;

    store.save_selected_package(config, &configured("liblo", "1.0.0"))?;
    let mut app = configured("app", "1.0.0");
    app.prerequisites.insert(
        PackageKey::new(config, name("liblo")),
        Some(VersionConstraint::from_str("^1.0.0")?),
    );
    app.alternatives = vec![1];
    app.config_checksum = "2c26b46b68ffc68f".to_string();
    store.save_selected_package(config, &app)?;

    let plan = resolve(&mut store, &[UserAction::build(name("liblo"))])?;
    insta::assert_snapshot!("optional_reevaluation_plan", rendered(&plan));

    // The dependent is reconfigured, not re-evaluated: its recorded
    // configuration is carried over unchanged.
    let configure_app = plan
        .steps
        .iter()
        .find_map(|step| match step {
            PlanStep::Configure { key, data, .. } if key.name == name("app") => Some(data),
            _ => None,
        })
        .expect("configure step for app");
    assert_eq!(configure_app.checksum, "2c26b46b68ffc68f");
    Ok(())
}

#[test]
fn dropping_a_held_package_needs_confirmation() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
    let config = store.self_uuid();

    let mut tool = configured("tool", "1.0.0");
    tool.hold_package = true;
    store.save_selected_package(config, &tool)?;

    let err = resolve(&mut store, &[UserAction::drop(name("tool"))]).unwrap_err();
    assert!(matches!(err, Error::DropHeld(_)));

    let plan = resolve_with_yes(&mut store, &[UserAction::drop(name("tool"))])?;
    insta::assert_snapshot!("drop_held_plan", rendered(&plan));
    Ok(())
}

#[test]
fn replanning_an_applied_state_is_empty() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
    let config = store.self_uuid();

    store.insert_available_package(config, &available("libhello", "1.0.1", &[]))?;
    store.insert_available_package(
        config,
        &available("hello", "1.0.0", &["libhello ^1.0.0"]),
    )?;

    // The state an earlier run would have left behind.
    let mut libhello = configured("libhello", "1.0.1");
    libhello.alternatives = Vec::new();
    store.save_selected_package(config, &libhello)?;
    let mut hello = configured("hello", "1.0.0");
    hello.hold_package = true;
    hello.prerequisites.insert(
        PackageKey::new(config, name("libhello")),
        Some(VersionConstraint::from_str("^1.0.0")?),
    );
    hello.alternatives = vec![1];
    store.save_selected_package(config, &hello)?;

    let plan = resolve(&mut store, &[UserAction::build(name("hello"))])?;
    assert!(plan.is_empty(), "{plan}");
    Ok(())
}

#[test]
fn source_candidate_wins_over_system_at_equal_version() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
    let config = store.self_uuid();

    let mut system = available("libsys", "1.0.0", &[]);
    system.system = true;
    store.insert_available_package(config, &system)?;
    store.insert_available_package(config, &available("libsys", "1.0.0", &[]))?;

    // Without the system flag the source candidate is chosen.
    let plan = resolve(&mut store, &[UserAction::build(name("libsys"))])?;
    let rendered_plan = rendered(&plan);
    assert!(rendered_plan.contains("fetch libsys 1.0.0"), "{rendered_plan}");
    assert!(
        rendered_plan.contains("configure libsys 1.0.0"),
        "{rendered_plan}"
    );
    assert!(!rendered_plan.contains("sys:"), "{rendered_plan}");

    // With it the system candidate wins and there is nothing to fetch.
    let mut action = UserAction::build(name("libsys"));
    action.system = true;
    let plan = resolve(&mut store, &[action])?;
    let rendered_plan = rendered(&plan);
    assert!(
        rendered_plan.contains("configure sys:libsys 1.0.0"),
        "{rendered_plan}"
    );
    assert!(!rendered_plan.contains("fetch"), "{rendered_plan}");
    Ok(())
}

#[test]
fn changed_external_source_bumps_iteration() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
    let config = store.self_uuid();

    store.insert_available_package(config, &available("exten", "1.0.0", &[]))?;

    let src_root = tmp.path().join("exten-src");
    std::fs::create_dir_all(&src_root)?;
    std::fs::write(src_root.join("buildfile"), "using cc\n")?;

    let mut selected = configured("exten", "1.0.0");
    selected.hold_package = true;
    selected.archive = None;
    selected.src_root = Some(src_root.clone());
    selected.source_checksum = Some(brig_store::source_checksum(&src_root)?);
    store.save_selected_package(config, &selected)?;

    // With an unchanged source tree there is nothing to do.
    let plan = resolve(&mut store, &[UserAction::build(name("exten"))])?;
    assert!(plan.is_empty(), "{plan}");

    // A source change at the same version bumps the iteration so the
    // package still reconfigures.
    std::fs::write(src_root.join("buildfile"), "using cc\nusing rust\n")?;
    let plan = resolve(&mut store, &[UserAction::build(name("exten"))])?;
    let rendered_plan = rendered(&plan);
    assert!(
        rendered_plan.contains("configure exten 1.0.0#1"),
        "{rendered_plan}"
    );
    Ok(())
}

#[test]
fn unknown_package_is_fatal() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;

    let err = resolve(&mut store, &[UserAction::build(name("nosuch"))]).unwrap_err();
    assert!(matches!(err, Error::UnknownPackage(_)));
    Ok(())
}

#[test]
fn unsatisfied_existing_dependent_is_repaired() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let mut store = Store::create(tmp.path().join("work"), ConfigurationType::Target, None)?;
    let config = store.self_uuid();

    for ver in ["1.0.0", "1.5.0", "2.0.0"] {
        store.insert_available_package(config, &available("libdep", ver, &[]))?;
    }

    // An existing dependent pins libdep below 2.0.0.
    store.save_selected_package(config, &configured("libdep", "1.0.0"))?;
    let mut holder = configured("holder", "1.0.0");
    holder.prerequisites.insert(
        PackageKey::new(config, name("libdep")),
        Some(VersionConstraint::from_str("< 2.0.0")?),
    );
    store.save_selected_package(config, &holder)?;

    // Upgrading libdep without a constraint would pick 2.0.0 and
    // violate the existing dependent; the repair search settles on the
    // highest version inside the intersection.
    let plan = resolve(&mut store, &[UserAction::build(name("libdep"))])?;
    let rendered = plan.to_string();
    assert!(rendered.contains("libdep 1.5.0"), "{rendered}");
    assert!(!rendered.contains("libdep 2.0.0"), "{rendered}");
    Ok(())
}
