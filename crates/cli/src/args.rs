//! Command-line argument handling.
//!
//! The command accepts the subset of rsync's interface that release
//! pipelines use, plus the exodus-specific flags. A further set of rsync
//! flags is parsed and carried solely so existing invocations keep working;
//! those flags take effect only when the transfer is handed to the native
//! rsync, where [`Arguments::to_rsync_argv`] reconstructs them.

use std::ffi::OsString;

use clap::{Arg, ArgAction, ArgMatches, Command};

/// rsync flags accepted for compatibility and otherwise ignored.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IgnoredConfig {
    pub archive: bool,
    pub recursive: bool,
    pub links: bool,
    pub copy_links: bool,
    pub keep_dirlinks: bool,
    pub hard_links: bool,
    pub perms: bool,
    pub executability: bool,
    pub acls: bool,
    pub xattrs: bool,
    pub owner: bool,
    pub group: bool,
    pub devices: bool,
    pub specials: bool,
    pub times: bool,
    pub atimes: bool,
    pub crtimes: bool,
    pub omit_dir_times: bool,
    pub rsh: Option<String>,
    pub delete: bool,
    pub prune_empty_dirs: bool,
    pub timeout: Option<u64>,
    pub compress: bool,
    pub stats: bool,
    pub itemize_changes: bool,
}

/// Parsed command line.
#[derive(Clone, Debug)]
pub struct Arguments {
    pub verbose: u8,
    pub src: String,
    pub dest: String,
    /// `--filter` directives as given.
    pub filter: Vec<String>,
    /// `--include` patterns as given.
    pub include: Vec<String>,
    /// `--exclude` patterns as given.
    pub exclude: Vec<String>,
    /// All rule directives merged in command-line order, ready for the
    /// filter engine (`--include P` becomes `+ P`, `--exclude P` becomes
    /// `- P`).
    pub ordered_rules: Vec<String>,
    pub files_from: Option<String>,
    pub relative: bool,
    pub ignore_existing: bool,
    pub dry_run: bool,
    /// Join this existing publish instead of creating one.
    pub publish_id: Option<String>,
    /// Print gateway diagnostics and exit.
    pub diag: bool,
    /// Configuration file override.
    pub conf_path: Option<String>,
    pub ignored: IgnoredConfig,
}

fn ignored_flag(name: &'static str) -> Arg {
    Arg::new(name).long(name).action(ArgAction::SetTrue)
}

fn command() -> Command {
    Command::new("exodus-rsync")
        .disable_version_flag(true)
        .arg(Arg::new("verbose").short('v').action(ArgAction::Count))
        .arg(
            Arg::new("filter")
                .long("filter")
                .short('f')
                .value_name("RULE")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("include")
                .long("include")
                .value_name("PATTERN")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("exclude")
                .long("exclude")
                .value_name("PATTERN")
                .action(ArgAction::Append),
        )
        .arg(Arg::new("files-from").long("files-from").value_name("FILE"))
        .arg(
            Arg::new("relative")
                .long("relative")
                .short('R')
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("ignore-existing")
                .long("ignore-existing")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .short('n')
                .action(ArgAction::SetTrue),
        )
        .arg(Arg::new("exodus-publish").long("exodus-publish").value_name("ID"))
        .arg(
            Arg::new("exodus-diag")
                .long("exodus-diag")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("exodus-conf")
                .long("exodus-conf")
                .value_name("FILE")
                .hide(true),
        )
        // The rsync compatibility set: accepted, carried, not acted upon.
        .arg(ignored_flag("archive").short('a'))
        .arg(ignored_flag("recursive").short('r'))
        .arg(ignored_flag("links").short('l'))
        .arg(ignored_flag("copy-links").short('L'))
        .arg(ignored_flag("keep-dirlinks").short('K'))
        .arg(ignored_flag("hard-links").short('H'))
        .arg(ignored_flag("perms").short('p'))
        .arg(ignored_flag("executability").short('E'))
        .arg(ignored_flag("acls").short('A'))
        .arg(ignored_flag("xattrs").short('X'))
        .arg(ignored_flag("owner").short('o'))
        .arg(ignored_flag("group").short('g'))
        .arg(ignored_flag("devices"))
        .arg(ignored_flag("specials"))
        .arg(ignored_flag("times").short('t'))
        .arg(ignored_flag("atimes").short('U'))
        .arg(ignored_flag("crtimes").short('N'))
        .arg(ignored_flag("omit-dir-times").short('O'))
        .arg(Arg::new("rsh").long("rsh").short('e').value_name("COMMAND"))
        .arg(ignored_flag("delete"))
        .arg(ignored_flag("prune-empty-dirs").short('m'))
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(ignored_flag("compress").short('z'))
        .arg(ignored_flag("stats"))
        .arg(ignored_flag("itemize-changes").short('i'))
        .arg(Arg::new("src").required(true))
        .arg(Arg::new("dest").required(true))
}

fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

// Rule order matters to the filter engine, so --filter/--include/--exclude
// occurrences are merged back into their command-line order by argv index.
fn ordered_rules(matches: &ArgMatches) -> Vec<String> {
    let mut rules: Vec<(usize, String)> = Vec::new();
    for (id, prefix) in [("filter", None), ("include", Some("+ ")), ("exclude", Some("- "))] {
        let (Some(indices), Some(values)) = (matches.indices_of(id), matches.get_many::<String>(id))
        else {
            continue;
        };
        for (index, value) in indices.zip(values) {
            let rule = match prefix {
                Some(prefix) => format!("{prefix}{value}"),
                None => value.clone(),
            };
            rules.push((index, rule));
        }
    }
    rules.sort_by_key(|(index, _)| *index);
    rules.into_iter().map(|(_, rule)| rule).collect()
}

/// Parses `argv` (including the program name).
pub fn parse_arguments(argv: &[OsString]) -> Result<Arguments, clap::Error> {
    let mut matches = command().try_get_matches_from(argv.iter().cloned())?;

    let ordered_rules = ordered_rules(&matches);
    let ignored = IgnoredConfig {
        archive: matches.get_flag("archive"),
        recursive: matches.get_flag("recursive"),
        links: matches.get_flag("links"),
        copy_links: matches.get_flag("copy-links"),
        keep_dirlinks: matches.get_flag("keep-dirlinks"),
        hard_links: matches.get_flag("hard-links"),
        perms: matches.get_flag("perms"),
        executability: matches.get_flag("executability"),
        acls: matches.get_flag("acls"),
        xattrs: matches.get_flag("xattrs"),
        owner: matches.get_flag("owner"),
        group: matches.get_flag("group"),
        devices: matches.get_flag("devices"),
        specials: matches.get_flag("specials"),
        times: matches.get_flag("times"),
        atimes: matches.get_flag("atimes"),
        crtimes: matches.get_flag("crtimes"),
        omit_dir_times: matches.get_flag("omit-dir-times"),
        rsh: matches.remove_one::<String>("rsh"),
        delete: matches.get_flag("delete"),
        prune_empty_dirs: matches.get_flag("prune-empty-dirs"),
        timeout: matches.remove_one::<u64>("timeout"),
        compress: matches.get_flag("compress"),
        stats: matches.get_flag("stats"),
        itemize_changes: matches.get_flag("itemize-changes"),
    };

    Ok(Arguments {
        verbose: matches.get_count("verbose"),
        src: matches.remove_one::<String>("src").unwrap_or_default(),
        dest: matches.remove_one::<String>("dest").unwrap_or_default(),
        filter: strings(&matches, "filter"),
        include: strings(&matches, "include"),
        exclude: strings(&matches, "exclude"),
        ordered_rules,
        files_from: matches.remove_one::<String>("files-from"),
        relative: matches.get_flag("relative"),
        ignore_existing: matches.get_flag("ignore-existing"),
        dry_run: matches.get_flag("dry-run"),
        publish_id: matches.remove_one::<String>("exodus-publish"),
        diag: matches.get_flag("exodus-diag"),
        conf_path: matches.remove_one::<String>("exodus-conf"),
        ignored,
    })
}

impl Arguments {
    /// Rebuilds the argument vector (without the program name) for handing
    /// the transfer to the native rsync.
    #[must_use]
    pub fn to_rsync_argv(&self) -> Vec<OsString> {
        fn flag(argv: &mut Vec<OsString>, enabled: bool, name: &str) {
            if enabled {
                argv.push(OsString::from(name));
            }
        }

        let mut argv: Vec<OsString> = Vec::new();
        if self.verbose > 0 {
            let mut verbose = String::from("-");
            for _ in 0..self.verbose {
                verbose.push('v');
            }
            argv.push(OsString::from(verbose));
        }

        let ignored = &self.ignored;
        flag(&mut argv, ignored.archive, "--archive");
        flag(&mut argv, ignored.recursive, "--recursive");
        flag(&mut argv, self.relative, "--relative");
        flag(&mut argv, ignored.links, "--links");
        flag(&mut argv, ignored.copy_links, "--copy-links");
        flag(&mut argv, ignored.keep_dirlinks, "--keep-dirlinks");
        flag(&mut argv, ignored.hard_links, "--hard-links");
        flag(&mut argv, ignored.perms, "--perms");
        flag(&mut argv, ignored.executability, "--executability");
        flag(&mut argv, ignored.acls, "--acls");
        flag(&mut argv, ignored.xattrs, "--xattrs");
        flag(&mut argv, ignored.owner, "--owner");
        flag(&mut argv, ignored.group, "--group");
        flag(&mut argv, ignored.devices, "--devices");
        flag(&mut argv, ignored.specials, "--specials");
        flag(&mut argv, ignored.times, "--times");
        flag(&mut argv, ignored.atimes, "--atimes");
        flag(&mut argv, ignored.crtimes, "--crtimes");
        flag(&mut argv, ignored.omit_dir_times, "--omit-dir-times");
        if let Some(rsh) = &ignored.rsh {
            argv.push(OsString::from("--rsh"));
            argv.push(OsString::from(rsh));
        }
        flag(&mut argv, self.ignore_existing, "--ignore-existing");
        flag(&mut argv, ignored.delete, "--delete");
        flag(&mut argv, ignored.prune_empty_dirs, "--prune-empty-dirs");
        if let Some(timeout) = ignored.timeout {
            argv.push(OsString::from("--timeout"));
            argv.push(OsString::from(timeout.to_string()));
        }
        flag(&mut argv, ignored.compress, "--compress");
        flag(&mut argv, self.dry_run, "--dry-run");
        for rule in &self.filter {
            argv.push(OsString::from("--filter"));
            argv.push(OsString::from(rule));
        }
        for pattern in &self.exclude {
            argv.push(OsString::from("--exclude"));
            argv.push(OsString::from(pattern));
        }
        for pattern in &self.include {
            argv.push(OsString::from("--include"));
            argv.push(OsString::from(pattern));
        }
        if let Some(files_from) = &self.files_from {
            argv.push(OsString::from("--files-from"));
            argv.push(OsString::from(files_from));
        }
        flag(&mut argv, ignored.stats, "--stats");
        flag(&mut argv, ignored.itemize_changes, "--itemize-changes");

        argv.push(OsString::from(&self.src));
        argv.push(OsString::from(&self.dest));
        argv
    }
}
