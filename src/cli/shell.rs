//! Interactive Shell Mode
//!
//! The line-oriented driver for the simulator. Each command maps onto one
//! core operation; errors are reported and the session keeps going. The
//! same `execute` path backs both the interactive prompt and script mode.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::str::FromStr;

use super::output::OutputFormatter;
use super::{CliConfig, CliError, CliResult, OutputFormat};
use crate::alloc::AllocatorMode;
use crate::cache::{CacheParams, ReplacementPolicy};
use crate::config::SimConfig;
use crate::system::{AllocRequest, CacheOutcome, System};
use crate::vm::PageOutcome;

/// Interactive shell
pub struct Shell {
    prompt: String,
    formatter: OutputFormatter,
    history: Vec<String>,
    defaults: CliConfig,
    system: Option<System>,
}

impl Shell {
    pub fn new(defaults: CliConfig) -> Self {
        let formatter = match defaults.color {
            Some(color) => OutputFormatter::new(defaults.output_format).with_color(color),
            None => OutputFormatter::new(defaults.output_format),
        };
        Self {
            prompt: "memsim> ".to_string(),
            formatter,
            history: Vec::new(),
            defaults,
            system: None,
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.defaults.output_format = format;
        self.formatter = match self.defaults.color {
            Some(color) => OutputFormatter::new(format).with_color(color),
            None => OutputFormatter::new(format),
        };
        self
    }

    /// The live system, if `init` has run.
    pub fn system(&self) -> Option<&System> {
        self.system.as_ref()
    }

    /// Run interactive shell
    pub fn run(&mut self) -> CliResult<()> {
        println!("=== MEMORY SIMULATOR ===");
        println!("Type 'help' for available commands, 'exit' to quit\n");

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("{}", self.prompt);
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            self.history.push(line.to_string());

            match self.execute(line) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    self.formatter.error(&e.to_string());
                }
            }
        }

        Ok(())
    }

    /// Execute a command script, one command per line. Blank lines and
    /// `#` comments are skipped; errors are reported and execution
    /// continues, exactly like the interactive loop.
    pub fn run_script(&mut self, path: &Path) -> CliResult<()> {
        let content = std::fs::read_to_string(path)?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            println!(">> {}", line);
            match self.execute(line) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    self.formatter.error(&e.to_string());
                }
            }
        }
        Ok(())
    }

    /// Execute a shell command. `Ok(true)` means exit.
    pub fn execute(&mut self, line: &str) -> CliResult<bool> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(false);
        }

        let cmd = parts[0];
        let args = &parts[1..];

        match cmd {
            "exit" | "quit" | "q" => {
                return Ok(true);
            }
            "help" | "?" => {
                self.print_help();
            }
            "history" => {
                for (i, cmd) in self.history.iter().enumerate() {
                    println!("{:4}  {}", i + 1, cmd);
                }
            }
            "clear" => {
                print!("\x1B[2J\x1B[1;1H");
            }
            "init" => {
                self.handle_init(args)?;
            }
            "alloc" => {
                self.handle_alloc(args)?;
            }
            "free" => {
                self.handle_free(args)?;
            }
            "vm_init" => {
                self.handle_vm_init(args)?;
            }
            "access" => {
                self.handle_access(args)?;
            }
            "vm_table" => {
                self.handle_vm_table(args)?;
            }
            "stats" => {
                let stats = self.system_mut()?.stats();
                self.formatter.print(&stats)?;
            }
            "dump" => {
                let dump = self.system_mut()?.dump();
                self.formatter.print(&dump)?;
            }
            _ => {
                self.formatter.error(&format!(
                    "Unknown command: {}. Type 'help' for available commands.",
                    cmd
                ));
            }
        }

        Ok(false)
    }

    fn print_help(&self) {
        println!("Commands:");
        println!("  init <ram> <page> <l1_size> <l1_blk> <l1_assoc> <l2_size> <l2_blk> <l2_assoc> [l1_policy [l2_policy]]");
        println!("                                : Set up the system (policies: fifo|lru|lfu)");
        println!("  alloc ff <bytes>              : Allocate (First Fit)");
        println!("  alloc bf <bytes>              : Allocate (Best Fit)");
        println!("  alloc wf <bytes>              : Allocate (Worst Fit)");
        println!("  alloc buddy <bytes>           : Allocate (Buddy)");
        println!("  free <id>                     : Free block by id");
        println!("  vm_init <pid> <size>          : Create process page table");
        println!("  access <pid> <vaddr>          : Access memory through VM and caches");
        println!("  vm_table <pid>                : Dump a process page table");
        println!("  stats                         : Show statistics");
        println!("  dump                          : Show memory map");
        println!("  help, ?                       : Show this help");
        println!("  history                       : Show command history");
        println!("  clear                         : Clear screen");
        println!("  exit, quit, q                 : Quit");
    }

    fn system_mut(&mut self) -> CliResult<&mut System> {
        self.system
            .as_mut()
            .ok_or_else(|| CliError::Config("no system configured; run init first".to_string()))
    }

    fn handle_init(&mut self, args: &[&str]) -> CliResult<()> {
        if args.len() < 8 || args.len() > 10 {
            return Err(CliError::InvalidArg(
                "usage: init <ram> <page> <l1_size> <l1_blk> <l1_assoc> <l2_size> <l2_blk> <l2_assoc> [l1_policy [l2_policy]]"
                    .to_string(),
            ));
        }

        let ram_size = parse_num::<usize>(args[0], "ram size")?;
        let page_size = parse_num::<usize>(args[1], "page size")?;
        let l1_policy = match args.get(8) {
            Some(token) => parse_policy(token)?,
            None => ReplacementPolicy::Fifo,
        };
        let l2_policy = match args.get(9) {
            Some(token) => parse_policy(token)?,
            None => l1_policy,
        };

        let config = SimConfig {
            ram_size,
            page_size,
            min_block: self.defaults.min_block,
            l1: CacheParams {
                name: "L1".to_string(),
                size: parse_num(args[2], "L1 size")?,
                block_size: parse_num(args[3], "L1 block size")?,
                associativity: parse_num(args[4], "L1 associativity")?,
                access_cost: self.defaults.l1_latency,
                policy: l1_policy,
            },
            l2: CacheParams {
                name: "L2".to_string(),
                size: parse_num(args[5], "L2 size")?,
                block_size: parse_num(args[6], "L2 block size")?,
                associativity: parse_num(args[7], "L2 associativity")?,
                access_cost: self.defaults.l2_latency,
                policy: l2_policy,
            },
            mem_penalty: self.defaults.mem_penalty,
            disk_penalty: self.defaults.disk_penalty,
        };

        self.system = Some(System::new(config)?);
        self.formatter.success("System initialized");
        Ok(())
    }

    fn handle_alloc(&mut self, args: &[&str]) -> CliResult<()> {
        if args.len() != 2 {
            return Err(CliError::InvalidArg(
                "usage: alloc <ff|bf|wf|buddy> <bytes>".to_string(),
            ));
        }
        let request =
            AllocRequest::from_str(args[0]).map_err(CliError::InvalidArg)?;
        let size = parse_num::<usize>(args[1], "allocation size")?;

        let allocation = self.system_mut()?.alloc(request, size)?;
        // Buddy addresses print in hex, linear in decimal, consistently
        // within a session.
        let msg = match request.mode() {
            AllocatorMode::Buddy => format!(
                "Allocated block id={} at address {:#x}",
                allocation.id, allocation.addr
            ),
            AllocatorMode::Linear => format!(
                "Allocated block id={} at address {}",
                allocation.id, allocation.addr
            ),
        };
        self.formatter.success(&msg);
        Ok(())
    }

    fn handle_free(&mut self, args: &[&str]) -> CliResult<()> {
        if args.len() != 1 {
            return Err(CliError::InvalidArg("usage: free <id>".to_string()));
        }
        let id = parse_num(args[0], "block id")?;
        let freed = self.system_mut()?.free(id)?;
        self.formatter
            .success(&format!("Freed block id={} ({} bytes)", freed.id, freed.size));
        Ok(())
    }

    fn handle_vm_init(&mut self, args: &[&str]) -> CliResult<()> {
        if args.len() != 2 {
            return Err(CliError::InvalidArg(
                "usage: vm_init <pid> <virtual_size>".to_string(),
            ));
        }
        let pid = parse_num(args[0], "pid")?;
        let size = parse_num::<usize>(args[1], "virtual size")?;
        let num_pages = self.system_mut()?.vm_init(pid, size)?;
        self.formatter.success(&format!(
            "Virtual memory initialized for PID {}: {} pages of {} B",
            pid, num_pages, size / num_pages
        ));
        Ok(())
    }

    fn handle_access(&mut self, args: &[&str]) -> CliResult<()> {
        if args.len() != 2 {
            return Err(CliError::InvalidArg(
                "usage: access <pid> <vaddr>".to_string(),
            ));
        }
        let pid = parse_num(args[0], "pid")?;
        let vaddr = parse_num::<usize>(args[1], "virtual address")?;

        let routed = self.system_mut()?.vm_access(pid, vaddr)?;
        let t = routed.translation;
        match t.outcome {
            PageOutcome::Hit { frame } => {
                println!("PAGE HIT (pid {}, page {}, frame {})", t.pid, t.page, frame);
            }
            PageOutcome::Fault { evicted, frame } => {
                println!("PAGE FAULT (pid {}, page {})", t.pid, t.page);
                if let Some(ev) = evicted {
                    println!("PAGE EVICTION: pid {}, frame {}", ev.pid, ev.frame);
                }
                println!("Mapped (pid {}, page {}) -> frame {}", t.pid, t.page, frame);
            }
        }
        match routed.served_by {
            CacheOutcome::L1Hit => println!("L1 hit"),
            CacheOutcome::L2Hit => println!("L1 miss. L2 hit."),
            CacheOutcome::MainMemory => {
                println!("L1 miss. L2 miss. Accessing main memory.")
            }
        }
        Ok(())
    }

    fn handle_vm_table(&mut self, args: &[&str]) -> CliResult<()> {
        if args.len() != 1 {
            return Err(CliError::InvalidArg("usage: vm_table <pid>".to_string()));
        }
        let pid = parse_num(args[0], "pid")?;
        let table = self.system_mut()?.vm_table(pid)?;
        self.formatter.print(&table)?;
        Ok(())
    }
}

fn parse_num<T: FromStr>(token: &str, what: &str) -> CliResult<T> {
    token
        .parse()
        .map_err(|_| CliError::InvalidArg(format!("{} must be a number, got '{}'", what, token)))
}

fn parse_policy(token: &str) -> CliResult<ReplacementPolicy> {
    ReplacementPolicy::from_str(token).map_err(CliError::InvalidArg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::AllocatorMode;

    fn shell() -> Shell {
        let mut defaults = CliConfig::default();
        defaults.color = Some(false);
        defaults.min_block = 128;
        Shell::new(defaults)
    }

    fn init_line() -> &'static str {
        "init 1024 256 128 64 2 512 64 4"
    }

    #[test]
    fn init_builds_a_system() {
        let mut shell = shell();
        assert_eq!(shell.execute(init_line()).unwrap(), false);
        assert!(shell.system().is_some());
    }

    #[test]
    fn commands_before_init_are_rejected() {
        let mut shell = shell();
        assert!(shell.execute("alloc ff 100").is_err());
        assert!(shell.execute("stats").is_err());
    }

    #[test]
    fn alloc_free_flow() {
        let mut shell = shell();
        shell.execute(init_line()).unwrap();
        shell.execute("alloc ff 200").unwrap();
        shell.execute("alloc ff 300").unwrap();
        shell.execute("free 1").unwrap();

        let sys = shell.system().unwrap();
        assert_eq!(sys.mode(), Some(AllocatorMode::Linear));
        let stats = sys.stats();
        assert_eq!(stats.linear.counters.succeeded, 2);

        // Freeing the same id again is an error, not a crash.
        assert!(shell.execute("free 1").is_err());
    }

    #[test]
    fn mode_lock_rejects_cross_mode_alloc() {
        let mut shell = shell();
        shell.execute(init_line()).unwrap();
        shell.execute("alloc bf 100").unwrap();
        assert!(shell.execute("alloc buddy 100").is_err());
        // A fresh init releases the lock.
        shell.execute(init_line()).unwrap();
        shell.execute("alloc buddy 100").unwrap();
        assert_eq!(shell.system().unwrap().mode(), Some(AllocatorMode::Buddy));
    }

    #[test]
    fn access_and_vm_table_flow() {
        let mut shell = shell();
        shell.execute(init_line()).unwrap();
        shell.execute("vm_init 1 1024").unwrap();
        shell.execute("access 1 0").unwrap();
        shell.execute("access 1 255").unwrap();
        shell.execute("vm_table 1").unwrap();

        let stats = shell.system().unwrap().stats();
        assert_eq!(stats.vm.page_faults, 1);
        assert_eq!(stats.vm.page_hits, 1);
        assert!(stats.total_cycles > 0);
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let mut shell = shell();
        assert!(shell.execute("init 1024 256 128 64 2 512 64 4 mru").is_err());
    }

    #[test]
    fn custom_policies_are_applied() {
        let mut shell = shell();
        shell
            .execute("init 1024 256 128 64 2 512 64 4 lru lfu")
            .unwrap();
        let sys = shell.system().unwrap();
        assert_eq!(sys.config().l1.policy, ReplacementPolicy::Lru);
        assert_eq!(sys.config().l2.policy, ReplacementPolicy::Lfu);
    }

    #[test]
    fn exit_terminates_the_loop() {
        let mut shell = shell();
        assert_eq!(shell.execute("exit").unwrap(), true);
        assert_eq!(shell.execute("q").unwrap(), true);
    }

    #[test]
    fn unknown_command_is_not_fatal() {
        let mut shell = shell();
        assert_eq!(shell.execute("bogus 1 2 3").unwrap(), false);
    }

    #[test]
    fn script_runs_to_completion() {
        use std::io::Write as _;
        let mut shell = shell();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.msim");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# allocator trace").unwrap();
        writeln!(file, "{}", init_line()).unwrap();
        writeln!(file, "alloc ff 200").unwrap();
        writeln!(file, "alloc ff 300").unwrap();
        writeln!(file, "free 1").unwrap();
        writeln!(file, "alloc bf 40").unwrap();
        writeln!(file, "dump").unwrap();
        drop(file);

        shell.run_script(&path).unwrap();
        let sys = shell.system().unwrap();
        // The best-fit allocation must have landed in the freed 200-byte
        // hole at address 0.
        let blocks = sys.dump().linear_blocks;
        assert_eq!(blocks[0].start, 0);
        assert_eq!(blocks[0].size, 40);
        assert!(!blocks[0].is_free());
    }
}
