// src/solver/direct.rs

//! A literal resolution engine
//!
//! Applies each request as written: the best candidate of an install
//! request is installed, installed matches of an erase request are erased,
//! and update requests move installed packages to the newest candidate.
//! Requirements are checked but never expanded into further installs.

use super::{Action, Problem, Request, Resolution, ResolutionEngine, RuleKind, Solution, SolutionElement};
use crate::pool::{Dependency, PackageId, Pool};
use crate::resolver::{Constraint, Job, Selector, narrow};
use crate::transaction::{StepKind, Transaction, TransactionStep};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Engine that applies requests literally
#[derive(Debug, Default)]
pub struct DirectEngine;

impl DirectEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Working state of one solve
#[derive(Default)]
struct Plan {
    /// New package and the installed package it replaces
    installs: Vec<(PackageId, Option<PackageId>)>,
    erases: Vec<PackageId>,
    /// Request index that planned each package
    origin: HashMap<PackageId, usize>,
}

impl Plan {
    fn install(&mut self, id: PackageId, replaces: Option<PackageId>, request: usize) {
        if self.origin.contains_key(&id) {
            return;
        }
        self.origin.insert(id, request);
        self.installs.push((id, replaces));
    }

    fn erase(&mut self, id: PackageId, request: usize) {
        if self.erases.contains(&id) {
            return;
        }
        self.origin.entry(id).or_insert(request);
        self.erases.push(id);
    }

    fn leaving(&self) -> HashSet<PackageId> {
        self.erases
            .iter()
            .copied()
            .chain(self.installs.iter().filter_map(|(_, old)| *old))
            .collect()
    }
}

/// Order candidates: higher repo priority, then newer evr, then better arch
fn compare_candidates(pool: &Pool, a: PackageId, b: PackageId) -> Ordering {
    let (sa, sb) = (pool.solvable(a), pool.solvable(b));
    let arch_score = |arch: &str| pool.arch().score(arch).unwrap_or(usize::MAX);
    pool.repo(a.repo)
        .priority
        .cmp(&pool.repo(b.repo).priority)
        .then_with(|| sa.parsed_evr().compare(&sb.parsed_evr()))
        .then_with(|| arch_score(&sb.arch).cmp(&arch_score(&sa.arch)))
        .then_with(|| b.cmp(&a))
}

fn best_candidate(pool: &Pool, candidates: impl IntoIterator<Item = PackageId>) -> Option<PackageId> {
    candidates
        .into_iter()
        .max_by(|&a, &b| compare_candidates(pool, a, b))
}

/// Classify replacing `old` with `new`
fn replacement_kind(pool: &Pool, new: PackageId, old: PackageId) -> StepKind {
    let (n, o) = (pool.solvable(new), pool.solvable(old));
    if n.arch != o.arch {
        return StepKind::ArchChange;
    }
    if let (Some(nv), Some(ov)) = (&n.vendor, &o.vendor)
        && nv != ov
    {
        return StepKind::VendorChange;
    }
    match n.parsed_evr().compare(&o.parsed_evr()) {
        Ordering::Greater => StepKind::Upgrade,
        Ordering::Less => StepKind::Downgrade,
        Ordering::Equal if n.checksum.is_some() && o.checksum.is_some() && n.checksum != o.checksum => {
            StepKind::Change
        }
        Ordering::Equal => StepKind::Reinstall,
    }
}

/// Packages matching a dependency
fn providers_of(pool: &Pool, dep: &Dependency) -> Vec<PackageId> {
    let mut jobs = vec![Job::provides(dep.name.clone())];
    if let Some(evr) = &dep.evr
        && !dep.flags.is_empty()
    {
        jobs = narrow(
            jobs,
            Constraint::Version {
                flags: dep.flags,
                evr: evr.clone(),
            },
        );
    }
    jobs.iter().flat_map(|j| j.packages(pool)).collect()
}

impl DirectEngine {
    fn plan_install(&self, pool: &Pool, plan: &mut Plan, problems: &mut Vec<Problem>, index: usize, request: &Request) {
        let candidates = request.job.packages(pool);
        if candidates.is_empty() {
            let mut problem = Problem::new(RuleKind::JobNothingProvides);
            problem.dep = Some(request.job.to_string());
            problem.request = Some(index);
            problem.solutions.push(drop_request(index, request));
            problems.push(problem);
            return;
        }
        if candidates.iter().any(|&id| pool.is_installed(id)) {
            debug!("{}: already installed", request);
            return;
        }

        let Some(best) = best_candidate(pool, candidates.iter().copied().filter(|&id| pool.installable(id))) else {
            let mut problem = Problem::new(RuleKind::NotInstallable);
            problem.target = Some(pool.solvable(candidates[0]).to_string());
            problem.request = Some(index);
            problem.solutions.push(drop_request(index, request));
            problems.push(problem);
            return;
        };

        let s = pool.solvable(best);
        let replaces = pool
            .installed_named(&s.name)
            .into_iter()
            .find(|&old| pool.solvable(old).arch == s.arch)
            .or_else(|| pool.installed_named(&s.name).into_iter().next());
        plan.install(best, replaces, index);
    }

    fn plan_update(&self, pool: &Pool, plan: &mut Plan, index: usize, request: &Request) {
        let all = matches!(request.job.selector(), Selector::All);
        let job_packages = request.job.packages(pool);
        let installed: Vec<PackageId> = job_packages
            .iter()
            .copied()
            .filter(|&id| pool.is_installed(id))
            .collect();

        for old in installed {
            let os = pool.solvable(old);
            let candidates: Vec<PackageId> = if all {
                Job::name(os.name.clone()).packages(pool)
            } else {
                job_packages.clone()
            };
            let newer = candidates.into_iter().filter(|&id| {
                let s = pool.solvable(id);
                !pool.is_installed(id)
                    && pool.installable(id)
                    && s.name == os.name
                    && (s.arch == os.arch || s.arch == "noarch" || os.arch == "noarch")
                    && s.parsed_evr().compare(&os.parsed_evr()) == Ordering::Greater
            });
            if let Some(best) = best_candidate(pool, newer) {
                plan.install(best, Some(old), index);
            }
        }
    }

    /// Apply obsoletes of planned installs as erases
    fn apply_obsoletes(&self, pool: &Pool, plan: &mut Plan) {
        let mut obsoleted = Vec::new();
        for &(id, _) in &plan.installs {
            let s = pool.solvable(id);
            for dep in &s.obsoletes {
                for victim in providers_of(pool, dep) {
                    let v = pool.solvable(victim);
                    if pool.is_installed(victim) && v.name == dep.name && v.name != s.name {
                        obsoleted.push((victim, plan.origin[&id]));
                    }
                }
            }
        }
        for (victim, request) in obsoleted {
            plan.erase(victim, request);
        }
    }

    fn check(&self, pool: &Pool, plan: &Plan, requests: &[Request], problems: &mut Vec<Problem>) {
        // The same name both installed and erased
        for &erased in &plan.erases {
            let name = &pool.solvable(erased).name;
            if let Some(&(new, _)) = plan.installs.iter().find(|(id, _)| pool.solvable(*id).name == *name) {
                let (a, b) = (plan.origin[&new], plan.origin[&erased]);
                if a == b {
                    continue;
                }
                let mut problem = Problem::new(RuleKind::ConflictingRequests);
                problem.source = Some(pool.solvable(new).to_string());
                problem.target = Some(pool.solvable(erased).to_string());
                problem.request = Some(a);
                problem.solutions.push(drop_request(a, &requests[a]));
                problem.solutions.push(drop_request(b, &requests[b]));
                problems.push(problem);
            }
        }

        let leaving = plan.leaving();
        let planned: HashSet<PackageId> = plan.installs.iter().map(|(id, _)| *id).collect();
        let in_result = |id: PackageId| {
            planned.contains(&id) || (pool.is_installed(id) && !leaving.contains(&id))
        };

        for &(id, _) in &plan.installs {
            let s = pool.solvable(id);
            let request = plan.origin[&id];

            for dep in s.requires.iter().filter(|d| !d.name.starts_with("rpmlib(")) {
                if providers_of(pool, dep).is_empty() {
                    let mut problem = Problem::new(RuleKind::NothingProvidesDep);
                    problem.source = Some(s.to_string());
                    problem.dep = Some(dep.to_string());
                    problem.request = Some(request);
                    problem.solutions.push(Solution {
                        elements: vec![SolutionElement::DoNotInstall(s.to_string())],
                    });
                    problems.push(problem);
                }
            }

            for dep in &s.conflicts {
                for other in providers_of(pool, dep) {
                    if other == id || !in_result(other) || pool.solvable(other).name == s.name {
                        continue;
                    }
                    problems.push(conflict_problem(pool, id, other, dep, request));
                }
            }
        }

        // Conflicts declared by packages staying installed
        if let Some(repo) = pool.installed() {
            for index in 0..pool.repo(repo).solvables.len() {
                let installed = PackageId { repo, index };
                if leaving.contains(&installed) {
                    continue;
                }
                for dep in &pool.solvable(installed).conflicts {
                    for other in providers_of(pool, dep) {
                        if let Some(&request) = plan.origin.get(&other)
                            && planned.contains(&other)
                        {
                            problems.push(conflict_problem(pool, installed, other, dep, request));
                        }
                    }
                }
            }
        }
    }
}

fn drop_request(index: usize, request: &Request) -> Solution {
    Solution {
        elements: vec![SolutionElement::DropRequest {
            request: index,
            description: request.to_string(),
        }],
    }
}

/// `source` declares a conflict matched by `target`
fn conflict_problem(pool: &Pool, source: PackageId, target: PackageId, dep: &Dependency, request: usize) -> Problem {
    let mut problem = Problem::new(RuleKind::PackageConflict);
    problem.source = Some(pool.solvable(source).to_string());
    problem.target = Some(pool.solvable(target).to_string());
    problem.dep = Some(dep.to_string());
    problem.request = Some(request);

    let (incoming, installed) = if pool.is_installed(source) {
        (target, Some(source))
    } else {
        (source, pool.is_installed(target).then_some(target))
    };
    problem.solutions.push(Solution {
        elements: vec![SolutionElement::DoNotInstall(pool.solvable(incoming).to_string())],
    });
    if let Some(installed) = installed {
        problem.solutions.push(Solution {
            elements: vec![SolutionElement::AllowErase(pool.solvable(installed).to_string())],
        });
    }
    problem
}

impl ResolutionEngine for DirectEngine {
    fn solve(&mut self, pool: &Pool, requests: &[Request]) -> Resolution {
        let mut plan = Plan::default();
        let mut problems = Vec::new();

        for (index, request) in requests.iter().enumerate() {
            match request.action {
                Action::Install => self.plan_install(pool, &mut plan, &mut problems, index, request),
                Action::Erase => {
                    for id in request.job.packages(pool) {
                        if pool.is_installed(id) {
                            plan.erase(id, index);
                        }
                    }
                }
                Action::Update => self.plan_update(pool, &mut plan, index, request),
            }
        }

        self.apply_obsoletes(pool, &mut plan);
        self.check(pool, &plan, requests, &mut problems);

        if !problems.is_empty() {
            debug!("{} problems", problems.len());
            return Resolution::Problems(problems);
        }

        let mut steps: Vec<TransactionStep> = plan
            .erases
            .iter()
            .map(|&id| TransactionStep {
                package: id,
                kind: StepKind::Erase,
                other: None,
            })
            .collect();
        steps.extend(plan.installs.iter().map(|&(id, old)| TransactionStep {
            package: id,
            kind: old.map_or(StepKind::Install, |old| replacement_kind(pool, id, old)),
            other: old,
        }));

        Resolution::Transaction(Transaction::new(steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{ArchPolicy, RelFlags, Repo, Solvable};

    struct Universe {
        pool: Pool,
    }

    impl Universe {
        fn new(installed: Vec<Solvable>, available: Vec<Solvable>) -> Self {
            let mut pool = Pool::new(ArchPolicy::new("x86_64"));
            let mut system = Repo::new("@System");
            for (i, mut s) in installed.into_iter().enumerate() {
                s.installed_id = Some(i as i64 + 1);
                system.add_solvable(s);
            }
            let id = pool.add_repo(system);
            pool.set_installed(id);

            let mut main = Repo::new("main");
            for s in available {
                main.add_solvable(s);
            }
            pool.add_repo(main);
            pool.create_whatprovides();
            Self { pool }
        }

        fn solve(&self, requests: Vec<Request>) -> Resolution {
            DirectEngine::new().solve(&self.pool, &requests)
        }

        fn steps(&self, requests: Vec<Request>) -> Vec<(String, StepKind)> {
            match self.solve(requests) {
                Resolution::Transaction(tx) => tx
                    .steps()
                    .iter()
                    .map(|s| (self.pool.solvable(s.package).to_string(), s.kind))
                    .collect(),
                Resolution::Problems(p) => panic!("unexpected problems: {:?}", p),
            }
        }

        fn problems(&self, requests: Vec<Request>) -> Vec<Problem> {
            match self.solve(requests) {
                Resolution::Problems(p) => p,
                Resolution::Transaction(tx) => panic!("unexpected transaction: {:?}", tx),
            }
        }
    }

    fn install(name: &str) -> Request {
        Request::new(Action::Install, Job::name(name))
    }

    #[test]
    fn test_install_picks_newest() {
        let u = Universe::new(
            vec![],
            vec![Solvable::new("foo", "1.0-1", "x86_64"), Solvable::new("foo", "1.2-1", "x86_64")],
        );
        assert_eq!(u.steps(vec![install("foo")]), vec![("foo-1.2-1.x86_64".to_string(), StepKind::Install)]);
    }

    #[test]
    fn test_priority_beats_version() {
        let mut u = Universe::new(vec![], vec![Solvable::new("foo", "2.0-1", "x86_64")]);
        let mut preferred = Repo::new("preferred");
        preferred.priority = 10;
        preferred.add_solvable(Solvable::new("foo", "1.0-1", "x86_64"));
        u.pool.add_repo(preferred);
        u.pool.create_whatprovides();
        assert_eq!(u.steps(vec![install("foo")])[0].0, "foo-1.0-1.x86_64");
    }

    #[test]
    fn test_install_of_installed_is_noop() {
        let u = Universe::new(vec![Solvable::new("foo", "1.0-1", "x86_64")], vec![]);
        assert!(u.steps(vec![install("foo")]).is_empty());
    }

    #[test]
    fn test_install_nothing_provides() {
        let u = Universe::new(vec![], vec![]);
        let problems = u.problems(vec![install("ghost")]);
        assert_eq!(problems[0].rule, RuleKind::JobNothingProvides);
        assert_eq!(problems[0].to_string(), "nothing provides requested name ghost");
        assert_eq!(problems[0].solutions[0].elements[0].to_string(), "do not ask to install name ghost");
    }

    #[test]
    fn test_wrong_arch_not_installable() {
        let u = Universe::new(vec![], vec![Solvable::new("foo", "1.0-1", "aarch64")]);
        let problems = u.problems(vec![install("foo")]);
        assert_eq!(problems[0].to_string(), "package foo-1.0-1.aarch64 is not installable");
    }

    #[test]
    fn test_missing_requirement_reported() {
        let mut foo = Solvable::new("foo", "1.0-1", "x86_64");
        foo.requires.push(Dependency::versioned("libbar", RelFlags::GT | RelFlags::EQ, "2"));
        let u = Universe::new(vec![], vec![foo]);
        let problems = u.problems(vec![install("foo")]);
        assert_eq!(problems[0].rule, RuleKind::NothingProvidesDep);
        assert_eq!(problems[0].to_string(), "nothing provides libbar >= 2 needed by foo-1.0-1.x86_64");
    }

    #[test]
    fn test_update_all_upgrades_installed() {
        let u = Universe::new(
            vec![Solvable::new("foo", "1.0-1", "x86_64"), Solvable::new("bar", "1.0-1", "x86_64")],
            vec![Solvable::new("foo", "1.1-1", "x86_64"), Solvable::new("baz", "1.0-1", "x86_64")],
        );
        let steps = u.steps(vec![Request::new(Action::Update, Job::new(Selector::All))]);
        assert_eq!(steps, vec![("foo-1.1-1.x86_64".to_string(), StepKind::Upgrade)]);
    }

    #[test]
    fn test_vendor_change_classified() {
        let mut old = Solvable::new("foo", "1.0-1", "x86_64");
        old.vendor = Some("Alpha".to_string());
        let mut new = Solvable::new("foo", "1.1-1", "x86_64");
        new.vendor = Some("Beta".to_string());
        let u = Universe::new(vec![old], vec![new]);
        let steps = u.steps(vec![Request::new(Action::Update, Job::name("foo"))]);
        assert_eq!(steps[0].1, StepKind::VendorChange);
    }

    #[test]
    fn test_explicit_older_version_downgrades() {
        let u = Universe::new(
            vec![Solvable::new("foo", "2.0-1", "x86_64")],
            vec![Solvable::new("foo", "1.0-1", "x86_64")],
        );
        let job = narrow(
            vec![Job::name("foo")],
            Constraint::Version {
                flags: RelFlags::EQ,
                evr: "1.0-1".to_string(),
            },
        );
        let steps = u.steps(vec![Request::new(Action::Install, job[0].clone())]);
        assert_eq!(steps, vec![("foo-1.0-1.x86_64".to_string(), StepKind::Downgrade)]);
    }

    #[test]
    fn test_erase_and_install_same_name_conflict() {
        let u = Universe::new(
            vec![Solvable::new("foo", "1.0-1", "x86_64")],
            vec![Solvable::new("foo", "2.0-1", "x86_64")],
        );
        let install_new = narrow(
            vec![Job::name("foo")],
            Constraint::Version {
                flags: RelFlags::EQ,
                evr: "2.0-1".to_string(),
            },
        );
        let problems = u.problems(vec![
            Request::new(Action::Install, install_new[0].clone()),
            Request::new(Action::Erase, Job::name("foo")),
        ]);
        assert_eq!(problems[0].rule, RuleKind::ConflictingRequests);
        assert_eq!(problems[0].solutions.len(), 2);
    }

    #[test]
    fn test_conflict_with_installed_package() {
        let mut bar = Solvable::new("bar", "1.0-1", "x86_64");
        bar.conflicts.push(Dependency::new("foo"));
        let u = Universe::new(vec![Solvable::new("foo", "1.0-1", "x86_64")], vec![bar]);
        let problems = u.problems(vec![install("bar")]);
        assert_eq!(problems[0].rule, RuleKind::PackageConflict);
        assert_eq!(
            problems[0].to_string(),
            "package bar-1.0-1.x86_64 conflicts with foo provided by foo-1.0-1.x86_64"
        );
        assert_eq!(problems[0].solutions[1].elements[0].to_string(), "allow deinstallation of foo-1.0-1.x86_64");
    }

    #[test]
    fn test_obsoletes_erase_installed() {
        let mut new = Solvable::new("newfoo", "1.0-1", "x86_64");
        new.obsoletes.push(Dependency::new("oldfoo"));
        let u = Universe::new(vec![Solvable::new("oldfoo", "1.0-1", "x86_64")], vec![new]);
        let steps = u.steps(vec![install("newfoo")]);
        assert_eq!(
            steps,
            vec![
                ("oldfoo-1.0-1.x86_64".to_string(), StepKind::Erase),
                ("newfoo-1.0-1.x86_64".to_string(), StepKind::Install),
            ]
        );
    }

    #[test]
    fn test_erase_only_installed() {
        let u = Universe::new(
            vec![Solvable::new("foo", "1.0-1", "x86_64")],
            vec![Solvable::new("foo", "2.0-1", "x86_64")],
        );
        let steps = u.steps(vec![Request::new(Action::Erase, Job::name("foo"))]);
        assert_eq!(steps, vec![("foo-1.0-1.x86_64".to_string(), StepKind::Erase)]);
    }
}
