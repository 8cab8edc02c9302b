//! End-to-end solver scenarios.

use krait_conda_types::{PackageRecord, RepoDataRecord};
use krait_solve::{
    Pool, ProblemRule, Request, RequestError, RequestItem, SolveJobs, Solver, SolverFlags,
};

/// A small builder for repodata records used throughout these tests.
struct Pkg {
    name: &'static str,
    version: &'static str,
    build: &'static str,
    depends: Vec<&'static str>,
    constrains: Vec<&'static str>,
    channel: &'static str,
}

impl Pkg {
    fn new(name: &'static str, version: &'static str) -> Self {
        Self {
            name,
            version,
            build: "0",
            depends: Vec::new(),
            constrains: Vec::new(),
            channel: "test",
        }
    }

    fn depends(mut self, depends: &[&'static str]) -> Self {
        self.depends = depends.to_vec();
        self
    }

    fn constrains(mut self, constrains: &[&'static str]) -> Self {
        self.constrains = constrains.to_vec();
        self
    }

    fn build(mut self, build: &'static str) -> Self {
        self.build = build;
        self
    }

    fn channel(mut self, channel: &'static str) -> Self {
        self.channel = channel;
        self
    }

    fn record(&self) -> RepoDataRecord {
        let mut package_record = PackageRecord::new(
            self.name.parse().unwrap(),
            self.version.parse().unwrap(),
            self.build,
        );
        package_record.depends = self.depends.iter().map(|s| s.to_string()).collect();
        package_record.constrains = self.constrains.iter().map(|s| s.to_string()).collect();
        package_record.subdir = "linux-64".to_string();
        let file_name = format!("{}-{}-{}.conda", self.name, self.version, self.build);
        RepoDataRecord {
            url: format!(
                "https://conda.anaconda.org/{}/linux-64/{file_name}",
                self.channel
            )
            .parse()
            .unwrap(),
            package_record,
            file_name,
            channel: Some(self.channel.to_string()),
        }
    }
}

fn pool_with(packages: &[Pkg]) -> Pool {
    let mut pool = Pool::new();
    let repo = pool.new_repo("test", 0);
    for pkg in packages {
        pool.add_solvable(repo, pkg.record()).unwrap().unwrap();
    }
    pool
}

fn install_jobs(pool: &mut Pool, specs: &[&str]) -> SolveJobs {
    let mut jobs = SolveJobs::default();
    for spec in specs {
        let spec_id = pool.intern_matchspec(spec).unwrap();
        jobs.install(spec_id);
    }
    jobs
}

/// Solves and returns `name version` strings, sorted.
fn solve_to_names(pool: &mut Pool, jobs: SolveJobs, flags: SolverFlags) -> Vec<String> {
    pool.create_whatprovides();
    let mut solver = Solver::new(pool, flags);
    let solution = solver.solve(jobs).expect("expected a solution");
    let mut names: Vec<String> = solution
        .solvables
        .iter()
        .map(|&id| {
            let record = &pool.resolve_solvable(id).record().package_record;
            format!("{} {}", record.name.as_normalized(), record.version)
        })
        .collect();
    names.sort();
    names
}

fn solve_unsat(pool: &mut Pool, jobs: SolveJobs, flags: SolverFlags) -> String {
    pool.create_whatprovides();
    let mut solver = Solver::new(pool, flags);
    match solver.solve(jobs) {
        Ok(_) => panic!("expected the request to be unsatisfiable"),
        Err(krait_solve::SolveError::Unsolvable(problem)) => {
            problem.display_user_friendly(&solver).to_string()
        }
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unit_propagation_single_package() {
    let mut pool = pool_with(&[Pkg::new("asdf", "1.2.3")]);
    let jobs = install_jobs(&mut pool, &["asdf"]);
    assert_eq!(
        solve_to_names(&mut pool, jobs, SolverFlags::default()),
        ["asdf 1.2.3"]
    );
}

#[test]
fn test_unit_propagation_nested() {
    let mut pool = pool_with(&[
        Pkg::new("asdf", "1.2.3").depends(&["efgh"]),
        Pkg::new("efgh", "4.5.6"),
        Pkg::new("dummy", "42.42.42"),
    ]);
    let jobs = install_jobs(&mut pool, &["asdf"]);
    assert_eq!(
        solve_to_names(&mut pool, jobs, SolverFlags::default()),
        ["asdf 1.2.3", "efgh 4.5.6"]
    );
}

#[test]
fn test_highest_version_is_preferred() {
    let mut pool = pool_with(&[
        Pkg::new("asdf", "1.2.4"),
        Pkg::new("asdf", "1.2.3"),
        Pkg::new("efgh", "4.5.7"),
        Pkg::new("efgh", "4.5.6"),
    ]);
    let jobs = install_jobs(&mut pool, &["asdf", "efgh"]);
    assert_eq!(
        solve_to_names(&mut pool, jobs, SolverFlags::default()),
        ["asdf 1.2.4", "efgh 4.5.7"]
    );
}

#[test]
fn test_conflict_is_resolved_by_backtracking() {
    let mut pool = pool_with(&[
        Pkg::new("asdf", "1.2.4").depends(&["conflicting==1.0.1"]),
        Pkg::new("asdf", "1.2.3").depends(&["conflicting==1.0.0"]),
        Pkg::new("efgh", "4.5.7").depends(&["conflicting==1.0.0"]),
        Pkg::new("efgh", "4.5.6").depends(&["conflicting==1.0.0"]),
        Pkg::new("conflicting", "1.0.1"),
        Pkg::new("conflicting", "1.0.0"),
    ]);
    let jobs = install_jobs(&mut pool, &["asdf", "efgh"]);
    assert_eq!(
        solve_to_names(&mut pool, jobs, SolverFlags::default()),
        ["asdf 1.2.3", "conflicting 1.0.0", "efgh 4.5.7"]
    );
}

#[test]
fn test_dependency_without_candidates_disables_the_dependent() {
    let mut pool = pool_with(&[
        Pkg::new("asdf", "1.2.4").depends(&["b"]),
        Pkg::new("asdf", "1.2.3"),
        Pkg::new("b", "1.2.3").depends(&["idontexist"]),
    ]);
    let jobs = install_jobs(&mut pool, &["asdf"]);
    assert_eq!(
        solve_to_names(&mut pool, jobs, SolverFlags::default()),
        ["asdf 1.2.3"]
    );
}

#[test]
fn test_cyclic_dependencies() {
    let mut pool = pool_with(&[
        Pkg::new("a", "2").depends(&["b<=10"]),
        Pkg::new("b", "5").depends(&["a>=2,<=4"]),
    ]);
    let jobs = install_jobs(&mut pool, &["a<100"]);
    assert_eq!(
        solve_to_names(&mut pool, jobs, SolverFlags::default()),
        ["a 2", "b 5"]
    );
}

#[test]
fn test_constrains_excludes_conflicting_candidate() {
    let mut pool = pool_with(&[
        Pkg::new("a", "1").depends(&["b"]).constrains(&["c <2"]),
        Pkg::new("b", "1").depends(&["c"]),
        Pkg::new("c", "2.0"),
        Pkg::new("c", "1.0"),
    ]);
    let jobs = install_jobs(&mut pool, &["a"]);
    assert_eq!(
        solve_to_names(&mut pool, jobs, SolverFlags::default()),
        ["a 1", "b 1", "c 1.0"]
    );
}

/// Scenario: a linear satisfiable install pulls in the interpreter.
#[test]
fn test_linear_satisfiable_install() {
    let mut pool = pool_with(&[
        Pkg::new("python", "3.9.0").build("h1"),
        Pkg::new("numpy", "1.23.0")
            .build("py39h1")
            .depends(&["python >=3.9,<3.10"]),
    ]);
    let jobs = install_jobs(&mut pool, &["numpy=1.23"]);
    assert_eq!(
        solve_to_names(&mut pool, jobs, SolverFlags::default()),
        ["numpy 1.23.0", "python 3.9.0"]
    );
}

/// Scenario: two requests requiring incompatible versions of `c`.
#[test]
fn test_unsatisfiable_version_conflict() {
    let mut pool = pool_with(&[
        Pkg::new("a", "1").depends(&["c >=2"]),
        Pkg::new("b", "1").depends(&["c <2"]),
        Pkg::new("c", "1"),
        Pkg::new("c", "2"),
    ]);

    let jobs = install_jobs(&mut pool, &["a", "b"]);
    pool.create_whatprovides();

    let mut solver = Solver::new(&pool, SolverFlags::default());
    let problem = match solver.solve(jobs) {
        Err(krait_solve::SolveError::Unsolvable(problem)) => problem,
        _ => panic!("expected the request to be unsatisfiable"),
    };

    let rules = problem.problem_rules(&solver);
    let mut saw_requires_high = false;
    let mut saw_requires_low = false;
    let mut saw_same_name = false;
    for rule in &rules {
        match rule {
            ProblemRule::Requires { spec, .. } => {
                let spec = solver.pool().resolve_spec(*spec).to_string();
                saw_requires_high |= spec == "c >=2";
                saw_requires_low |= spec == "c <2";
            }
            ProblemRule::SameName { first, second } => {
                let name_of = |id| {
                    solver
                        .pool()
                        .resolve_solvable(id)
                        .record()
                        .package_record
                        .name
                        .as_normalized()
                        .to_string()
                };
                if name_of(*first) == "c" && name_of(*second) == "c" {
                    saw_same_name = true;
                }
            }
            _ => {}
        }
    }
    assert!(saw_requires_high, "missing `requires c >=2` rule: {rules:?}");
    assert!(saw_requires_low, "missing `requires c <2` rule: {rules:?}");
    assert!(saw_same_name, "missing same-name conflict rule: {rules:?}");

    let rendered = problem.display_user_friendly(&solver).to_string();
    assert!(rendered.contains("The following packages are incompatible"));
    assert!(rendered.contains("c >=2"));
    assert!(rendered.contains("c <2"));
}

/// Scenario: force-reinstall targets the channel the package came from.
#[test]
fn test_force_reinstall_pins_the_installed_channel() {
    let mut pool = Pool::new();
    let chx = pool.new_repo("chx", 1);
    pool.add_solvable(chx, Pkg::new("tool", "1.0").channel("chx").record())
        .unwrap()
        .unwrap();
    let chy = pool.new_repo("chy", 0);
    pool.add_solvable(chy, Pkg::new("tool", "1.0").channel("chy").record())
        .unwrap()
        .unwrap();
    let installed = pool.new_repo("installed", 100);
    pool.add_solvable(installed, Pkg::new("tool", "1.0").channel("chx").record())
        .unwrap()
        .unwrap();
    pool.set_installed_repo(installed);

    let request: Request = [RequestItem::Install("tool".parse().unwrap())]
        .into_iter()
        .collect();
    let flags = SolverFlags {
        force_reinstall: true,
        ..SolverFlags::default()
    };
    let jobs = request.translate(&mut pool, flags).unwrap();
    pool.create_whatprovides();

    let mut solver = Solver::new(&pool, flags);
    let solution = solver.solve(jobs).unwrap();
    assert_eq!(solution.solvables.len(), 1);
    let chosen = pool.resolve_solvable(solution.solvables[0]).record();
    assert_eq!(chosen.channel.as_deref(), Some("chx"));
}

/// Scenario: a pin locks out all non-matching versions.
#[test]
fn test_pin_locks_out_non_matching_versions() {
    let packages = [
        Pkg::new("lib", "1.0"),
        Pkg::new("lib", "2.0"),
        Pkg::new("lib", "3.0"),
    ];

    // Without the pin the best version wins.
    let mut pool = pool_with(&packages);
    let request: Request = [RequestItem::Install("lib".parse().unwrap())]
        .into_iter()
        .collect();
    let jobs = request.translate(&mut pool, SolverFlags::default()).unwrap();
    assert_eq!(
        solve_to_names(&mut pool, jobs, SolverFlags::default()),
        ["lib 3.0"]
    );

    // With the pin only 1.x remains installable.
    let mut pool = pool_with(&packages);
    let request: Request = [
        RequestItem::Pin("lib<2".parse().unwrap()),
        RequestItem::Install("lib".parse().unwrap()),
    ]
    .into_iter()
    .collect();
    let jobs = request.translate(&mut pool, SolverFlags::default()).unwrap();
    assert_eq!(
        solve_to_names(&mut pool, jobs, SolverFlags::default()),
        ["lib 1.0"]
    );
}

#[test]
fn test_pin_matching_nothing_is_rejected() {
    let mut pool = pool_with(&[Pkg::new("lib", "1.0")]);
    let request: Request = [RequestItem::Pin("lib>5".parse().unwrap())]
        .into_iter()
        .collect();
    assert!(matches!(
        request.translate(&mut pool, SolverFlags::default()),
        Err(RequestError::UnsatisfiablePin(_))
    ));
}

/// A cleaned remove drops the dependency that only the removed package
/// needed; without cleanup the orphan stays installed.
#[test]
fn test_remove_with_clean_dependencies_drops_orphans() {
    let solve_remove = |clean_dependencies: bool| {
        let mut pool = Pool::new();
        let repo = pool.new_repo("test", 0);
        pool.add_solvable(repo, Pkg::new("foo", "1.0").depends(&["bar"]).record())
            .unwrap()
            .unwrap();
        pool.add_solvable(repo, Pkg::new("bar", "1.0").record())
            .unwrap()
            .unwrap();
        let installed = pool.new_repo("installed", 100);
        pool.add_solvable(installed, Pkg::new("foo", "1.0").depends(&["bar"]).record())
            .unwrap()
            .unwrap();
        pool.add_solvable(installed, Pkg::new("bar", "1.0").record())
            .unwrap()
            .unwrap();
        pool.set_installed_repo(installed);

        let request: Request = [RequestItem::Remove {
            spec: "foo".parse().unwrap(),
            clean_dependencies,
        }]
        .into_iter()
        .collect();
        let flags = SolverFlags {
            keep_orphans: true,
            ..SolverFlags::default()
        };
        let jobs = request.translate(&mut pool, flags).unwrap();
        solve_to_names(&mut pool, jobs, flags)
    };

    assert_eq!(solve_remove(false), ["bar 1.0"]);
    assert_eq!(solve_remove(true), Vec::<String>::new());
}

/// A dependency shared with a kept package survives a cleaned remove.
#[test]
fn test_clean_dependencies_keep_shared_dependencies() {
    let mut pool = Pool::new();
    let repo = pool.new_repo("test", 0);
    for pkg in [
        Pkg::new("foo", "1.0").depends(&["bar"]),
        Pkg::new("baz", "1.0").depends(&["bar"]),
        Pkg::new("bar", "1.0"),
    ] {
        pool.add_solvable(repo, pkg.record()).unwrap().unwrap();
    }
    let installed = pool.new_repo("installed", 100);
    for pkg in [
        Pkg::new("foo", "1.0").depends(&["bar"]),
        Pkg::new("baz", "1.0").depends(&["bar"]),
        Pkg::new("bar", "1.0"),
    ] {
        pool.add_solvable(installed, pkg.record()).unwrap().unwrap();
    }
    pool.set_installed_repo(installed);

    let request: Request = [RequestItem::Remove {
        spec: "foo".parse().unwrap(),
        clean_dependencies: true,
    }]
    .into_iter()
    .collect();
    let flags = SolverFlags {
        keep_orphans: true,
        ..SolverFlags::default()
    };
    let jobs = request.translate(&mut pool, flags).unwrap();
    assert_eq!(
        solve_to_names(&mut pool, jobs, flags),
        ["bar 1.0", "baz 1.0"]
    );
}

/// Updating everything with cleanup lets dependencies the new versions no
/// longer need fall away; without cleanup they are updated but kept.
#[test]
fn test_update_all_with_clean_dependencies() {
    let solve_update_all = |clean_dependencies: bool| {
        let mut pool = Pool::new();
        let repo = pool.new_repo("test", 0);
        pool.add_solvable(repo, Pkg::new("foo", "2.0").record())
            .unwrap()
            .unwrap();
        pool.add_solvable(repo, Pkg::new("bar", "2.0").record())
            .unwrap()
            .unwrap();
        let installed = pool.new_repo("installed", 100);
        pool.add_solvable(installed, Pkg::new("foo", "1.0").depends(&["bar"]).record())
            .unwrap()
            .unwrap();
        pool.add_solvable(installed, Pkg::new("bar", "1.0").record())
            .unwrap()
            .unwrap();
        pool.set_installed_repo(installed);

        let request: Request = [RequestItem::UpdateAll { clean_dependencies }]
            .into_iter()
            .collect();
        let jobs = request
            .translate(&mut pool, SolverFlags::default())
            .unwrap();
        solve_to_names(&mut pool, jobs, SolverFlags::default())
    };

    assert_eq!(solve_update_all(false), ["bar 2.0", "foo 2.0"]);
    assert_eq!(solve_update_all(true), ["foo 2.0"]);
}

#[test]
fn test_remove_with_channel_is_rejected() {
    let mut pool = pool_with(&[Pkg::new("lib", "1.0")]);
    let request: Request = [RequestItem::Remove {
        spec: "chx::lib".parse().unwrap(),
        clean_dependencies: true,
    }]
    .into_iter()
    .collect();
    assert!(matches!(
        request.translate(&mut pool, SolverFlags::default()),
        Err(RequestError::InvalidSpec { .. })
    ));
}

#[test]
fn test_installed_version_is_favored() {
    let mut pool = Pool::new();
    let repo = pool.new_repo("test", 0);
    pool.add_solvable(repo, Pkg::new("a", "1").record())
        .unwrap()
        .unwrap();
    pool.add_solvable(repo, Pkg::new("a", "2").record())
        .unwrap()
        .unwrap();
    let installed = pool.new_repo("installed", 100);
    let installed_a = pool
        .add_solvable(installed, Pkg::new("a", "1").record())
        .unwrap()
        .unwrap();
    pool.set_installed_repo(installed);

    let request: Request = [RequestItem::Keep("a".parse().unwrap())]
        .into_iter()
        .collect();
    let jobs = request.translate(&mut pool, SolverFlags::default()).unwrap();
    pool.create_whatprovides();
    let mut solver = Solver::new(&pool, SolverFlags::default());
    let solution = solver.solve(jobs).unwrap();
    assert_eq!(solution.solvables, vec![installed_a]);
}

#[test]
fn test_update_moves_off_the_installed_version() {
    let mut pool = Pool::new();
    let repo = pool.new_repo("test", 0);
    pool.add_solvable(repo, Pkg::new("a", "1").record())
        .unwrap()
        .unwrap();
    pool.add_solvable(repo, Pkg::new("a", "2").record())
        .unwrap()
        .unwrap();
    let installed = pool.new_repo("installed", 100);
    pool.add_solvable(installed, Pkg::new("a", "1").record())
        .unwrap()
        .unwrap();
    pool.set_installed_repo(installed);

    let request: Request = [RequestItem::Update("a".parse().unwrap())]
        .into_iter()
        .collect();
    let jobs = request.translate(&mut pool, SolverFlags::default()).unwrap();
    assert_eq!(
        solve_to_names(&mut pool, jobs, SolverFlags::default()),
        ["a 2"]
    );
}

#[test]
fn test_freeze_keeps_the_installed_build() {
    let mut pool = Pool::new();
    let repo = pool.new_repo("test", 0);
    pool.add_solvable(repo, Pkg::new("tool", "2.0").record())
        .unwrap()
        .unwrap();
    let installed = pool.new_repo("installed", 100);
    let frozen = pool
        .add_solvable(installed, Pkg::new("tool", "1.0").record())
        .unwrap()
        .unwrap();
    pool.set_installed_repo(installed);

    let request: Request = [
        RequestItem::Freeze("tool".parse().unwrap()),
        RequestItem::Install("tool".parse().unwrap()),
    ]
    .into_iter()
    .collect();
    let jobs = request.translate(&mut pool, SolverFlags::default()).unwrap();
    pool.create_whatprovides();
    let mut solver = Solver::new(&pool, SolverFlags::default());
    let solution = solver.solve(jobs).unwrap();
    assert_eq!(solution.solvables, vec![frozen]);
}

#[test]
fn test_strict_channel_priority_excludes_lower_channels() {
    let mut pool = Pool::new();
    let high = pool.new_repo("high", 1);
    pool.add_solvable(high, Pkg::new("pkg", "1.0").channel("high").record())
        .unwrap()
        .unwrap();
    let low = pool.new_repo("low", 0);
    pool.add_solvable(low, Pkg::new("pkg", "2.0").channel("low").record())
        .unwrap()
        .unwrap();

    let flags = SolverFlags {
        strict_channel_priority: true,
        ..SolverFlags::default()
    };
    let jobs = install_jobs(&mut pool, &["pkg"]);
    let names = solve_to_names(&mut pool, jobs, flags);
    assert_eq!(names, ["pkg 1.0"]);
}

#[test]
fn test_unsat_missing_top_level_package() {
    let mut pool = pool_with(&[Pkg::new("asdf", "1.2.3")]);
    let jobs = install_jobs(&mut pool, &["fghj"]);
    let rendered = solve_unsat(&mut pool, jobs, SolverFlags::default());
    assert!(rendered.contains("No candidates were found for fghj"));
}

#[test]
fn test_unsat_incompatible_root_requirements() {
    let mut pool = pool_with(&[Pkg::new("a", "2"), Pkg::new("a", "5")]);
    let jobs = install_jobs(&mut pool, &["a<4", "a>=5,<10"]);
    let rendered = solve_unsat(&mut pool, jobs, SolverFlags::default());
    assert!(rendered.contains("a <4"));
    assert!(rendered.contains("a >=5,<10"));
}

#[test]
fn test_unsat_after_backtracking() {
    let mut pool = pool_with(&[
        Pkg::new("b", "4.5.7").depends(&["d==1"]),
        Pkg::new("b", "4.5.6").depends(&["d==1"]),
        Pkg::new("c", "1.0.1").depends(&["d==2"]),
        Pkg::new("c", "1.0.0").depends(&["d==2"]),
        Pkg::new("d", "2.0.0"),
        Pkg::new("d", "1.0.0"),
        Pkg::new("e", "1.0.0"),
        Pkg::new("e", "1.0.1"),
    ]);
    let jobs = install_jobs(&mut pool, &["b", "c", "e"]);
    let rendered = solve_unsat(&mut pool, jobs, SolverFlags::default());
    assert!(rendered.contains("The following packages are incompatible"));
}

/// Two identical solves must produce identical decisions.
#[test]
fn test_determinism() {
    let build_pool = || {
        pool_with(&[
            Pkg::new("menu", "1.5.0").depends(&["dropdown>=2.0.0,<=2.3.0"]),
            Pkg::new("menu", "1.0.0").depends(&["dropdown>=1.8.0,<2.0.0"]),
            Pkg::new("dropdown", "2.3.0").depends(&["icons==2.0.0"]),
            Pkg::new("dropdown", "1.8.0").depends(&["intl==3.0.0"]),
            Pkg::new("icons", "2.0.0"),
            Pkg::new("icons", "1.0.0"),
            Pkg::new("intl", "5.0.0"),
            Pkg::new("intl", "3.0.0"),
        ])
    };

    let mut first_pool = build_pool();
    let first_jobs = install_jobs(&mut first_pool, &["menu"]);
    let first = solve_to_names(&mut first_pool, first_jobs, SolverFlags::default());

    let mut second_pool = build_pool();
    let second_jobs = install_jobs(&mut second_pool, &["menu"]);
    let second = solve_to_names(&mut second_pool, second_jobs, SolverFlags::default());

    assert_eq!(first, second);
}

/// Every non-optional dependency of every chosen solvable is satisfied
/// within the solution, and no name appears twice.
#[test]
fn test_solver_soundness() {
    let mut pool = pool_with(&[
        Pkg::new("menu", "1.5.0").depends(&["dropdown>=2.0.0,<=2.3.0"]),
        Pkg::new("dropdown", "2.3.0").depends(&["icons==2.0.0"]),
        Pkg::new("icons", "2.0.0"),
        Pkg::new("icons", "1.0.0"),
    ]);
    let jobs = install_jobs(&mut pool, &["menu"]);
    pool.create_whatprovides();
    let mut solver = Solver::new(&pool, SolverFlags::default());
    let solution = solver.solve(jobs).unwrap();

    let mut names = std::collections::HashSet::new();
    for &solvable_id in &solution.solvables {
        let solvable = pool.resolve_solvable(solvable_id);
        assert!(
            names.insert(solvable.name_id()),
            "duplicate name in solution"
        );
        for &dep in solvable.dependencies() {
            assert!(
                pool.candidates(dep)
                    .iter()
                    .any(|candidate| solution.solvables.contains(candidate)),
                "unsatisfied dependency {}",
                pool.resolve_spec(dep)
            );
        }
    }
}
