use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;

use amplicon_aggregator::classify::{RoleClassifier, StagingArea};
use amplicon_aggregator::config::ResolvedConfig;
use amplicon_aggregator::domain::DirectoryRole;
use amplicon_aggregator::fs_util;
use amplicon_aggregator::workspace::Workspace;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// scratch/run holds one complete sample, scratch/cnv a lone CNV output,
/// scratch/misc unrelated files and scratch/empty nothing at all.
fn scratch_tree(root: &Path) -> PathBuf {
    let scratch = root.join("extracted_from_zips");
    write(&scratch.join("run/S1/S1_AA_results/S1_summary.txt"), "#Amplicons = 2\n");
    write(&scratch.join("run/S1/S1_AA_results/S1_amplicon1_cycles.txt"), "cycles");
    write(&scratch.join("run/S1/S1_cnvkit_output/S1_CNV_CALLS.bed"), "chr1\t1\t2\t3\n");
    write(&scratch.join("run/S1/S1_classification/S1_result_table.tsv"), "Sample name\nS1\n");
    write(&scratch.join("cnv/S2_cnvkit_output/S2_CNV_CALLS.bed"), "chr2\t1\t2\t3\n");
    write(&scratch.join("misc/docs/readme.txt"), "notes");
    fs::create_dir_all(scratch.join("empty/nothing")).unwrap();
    scratch
}

fn workspace(root: &Path) -> Workspace {
    Workspace::new(Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap(), "batch")
}

fn relative_files(root: &Path) -> Vec<String> {
    fs_util::walk_files(root)
        .iter()
        .map(|path| path.strip_prefix(root).unwrap().to_string_lossy().to_string())
        .collect()
}

#[test]
fn plan_assigns_roles_and_targets() {
    let temp = tempfile::tempdir().unwrap();
    let scratch = scratch_tree(temp.path());
    let config = ResolvedConfig::default();
    let plan = RoleClassifier::new(&config).plan(&scratch, false).unwrap();

    assert_eq!(plan.role_of(&scratch.join("run/S1/S1_AA_results")), Some(DirectoryRole::PrimaryOutput));
    assert_eq!(plan.role_of(&scratch.join("run/S1/S1_cnvkit_output")), Some(DirectoryRole::CnvOutput));
    assert_eq!(
        plan.role_of(&scratch.join("run/S1/S1_classification")),
        Some(DirectoryRole::ClassificationOutput)
    );
    assert_eq!(plan.role_of(&scratch.join("misc")), Some(DirectoryRole::Unclassified));

    let primary = plan.staged(StagingArea::Primary).collect::<Vec<_>>();
    assert_eq!(primary.len(), 1);
    assert_eq!(primary[0].source, scratch.join("run/S1"));
    assert_eq!(primary[0].target_name, "S1");
    assert!(primary[0].skip.is_empty());

    let catch_all = plan
        .staged(StagingArea::CatchAll)
        .map(|step| (step.target_name.as_str(), step.role))
        .collect::<Vec<_>>();
    assert_eq!(
        catch_all,
        vec![
            ("S2_cnvkit_output", DirectoryRole::CnvOutput),
            ("misc", DirectoryRole::Unclassified),
        ]
    );
}

#[test]
fn staging_twice_yields_the_same_tree() {
    let temp = tempfile::tempdir().unwrap();
    let scratch = scratch_tree(temp.path());
    let ws = workspace(temp.path());
    ws.ensure().unwrap();
    let config = ResolvedConfig::default();
    let classifier = RoleClassifier::new(&config);

    let plan = classifier.plan(&scratch, false).unwrap();
    let report = classifier.stage(&plan, &ws).unwrap();
    assert_eq!(report.primary, vec![ws.primary_area().join("S1").into_std_path_buf()]);
    assert_eq!(report.catch_all.len(), 2);

    let results = ws.results_root().into_std_path_buf();
    let first = relative_files(&results);
    assert!(first.contains(&"AA_outputs/S1/S1_AA_results/S1_summary.txt".to_string()));
    assert!(first.contains(&"AA_outputs/S1/S1_classification/S1_result_table.tsv".to_string()));
    assert!(first.contains(&"other_files/S2_cnvkit_output/S2_CNV_CALLS.bed".to_string()));
    assert!(first.contains(&"other_files/misc/docs/readme.txt".to_string()));
    assert!(scratch.join("run/S1/S1_AA_results/S1_summary.txt").is_file());

    let again = classifier.plan(&scratch, false).unwrap();
    classifier.stage(&again, &ws).unwrap();
    assert_eq!(relative_files(&results), first);
}

#[test]
fn staged_tree_keeps_its_roles() {
    let temp = tempfile::tempdir().unwrap();
    let scratch = scratch_tree(temp.path());
    let ws = workspace(temp.path());
    ws.ensure().unwrap();
    let config = ResolvedConfig::default();
    let classifier = RoleClassifier::new(&config);
    classifier
        .stage(&classifier.plan(&scratch, false).unwrap(), &ws)
        .unwrap();

    let primary = ws.primary_area().into_std_path_buf();
    let catch_all = ws.catch_all_area().into_std_path_buf();
    assert_eq!(
        classifier.role_of(&primary.join("S1/S1_AA_results")).unwrap(),
        DirectoryRole::PrimaryOutput
    );
    assert_eq!(
        classifier.role_of(&primary.join("S1/S1_classification")).unwrap(),
        DirectoryRole::ClassificationOutput
    );
    assert_eq!(
        classifier.role_of(&catch_all.join("S2_cnvkit_output")).unwrap(),
        DirectoryRole::CnvOutput
    );
    assert_eq!(
        classifier.role_of(&catch_all.join("misc")).unwrap(),
        DirectoryRole::Unclassified
    );
}

#[test]
fn reclassify_drops_existing_classification_output() {
    let temp = tempfile::tempdir().unwrap();
    let scratch = scratch_tree(temp.path());
    write(&scratch.join("tables/S3_classification/S3_result_table.tsv"), "Sample name\nS3\n");
    let ws = workspace(temp.path());
    ws.ensure().unwrap();
    let config = ResolvedConfig::default();
    let classifier = RoleClassifier::new(&config);

    let plan = classifier.plan(&scratch, true).unwrap();
    let primary = plan.staged(StagingArea::Primary).next().unwrap();
    assert_eq!(primary.skip, vec![scratch.join("run/S1/S1_classification")]);
    assert!(
        plan.staged(StagingArea::CatchAll)
            .all(|step| step.role != DirectoryRole::ClassificationOutput)
    );

    classifier.stage(&plan, &ws).unwrap();
    let staged = ws.primary_area().join("S1");
    assert!(staged.join("S1_AA_results/S1_summary.txt").is_file());
    assert!(staged.join("S1_cnvkit_output/S1_CNV_CALLS.bed").is_file());
    assert!(!staged.join("S1_classification").exists());
    assert!(!ws.catch_all_area().join("S3_classification").exists());
}

#[test]
fn ambiguous_primary_goes_to_catch_all() {
    let temp = tempfile::tempdir().unwrap();
    let scratch = temp.path().join("extracted_from_zips");
    write(&scratch.join("amb/mixed_AA_results/S1_summary.txt"), "#Amplicons = 1\n");
    write(&scratch.join("amb/mixed_AA_results/S2_summary.txt"), "#Amplicons = 1\n");
    let config = ResolvedConfig::default();
    let plan = RoleClassifier::new(&config).plan(&scratch, false).unwrap();

    assert_eq!(
        plan.role_of(&scratch.join("amb/mixed_AA_results")),
        Some(DirectoryRole::Unclassified)
    );
    assert_eq!(plan.staged(StagingArea::Primary).count(), 0);
    let catch_all = plan.staged(StagingArea::CatchAll).collect::<Vec<_>>();
    assert_eq!(catch_all.len(), 1);
    assert_eq!(catch_all[0].source, scratch.join("amb"));
}

#[test]
fn sample_at_archive_root_is_staged_alone() {
    let temp = tempfile::tempdir().unwrap();
    let scratch = temp.path().join("extracted_from_zips");
    write(&scratch.join("batch/S4_AA_results/S4_summary.txt"), "#Amplicons = 1\n");
    write(&scratch.join("batch/S5_AA_results/S5_summary.txt"), "#Amplicons = 3\n");
    let config = ResolvedConfig::default();
    let plan = RoleClassifier::new(&config).plan(&scratch, false).unwrap();

    let targets = plan
        .staged(StagingArea::Primary)
        .map(|step| step.target_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(targets, vec!["S4_AA_results", "S5_AA_results"]);
    assert_eq!(plan.staged(StagingArea::CatchAll).count(), 0);
}
