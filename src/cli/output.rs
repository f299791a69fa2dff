//! CLI Output Formatting

use std::io::{self, Write};

use serde::Serialize;

use super::OutputFormat;
use crate::system::{MemoryDump, PageTableDump, SystemStats};

/// Output formatter
pub struct OutputFormatter {
    format: OutputFormat,
    color: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            color: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Print data in the configured format.
    pub fn print<T: Serialize + TablePrint>(&self, data: &T) -> io::Result<()> {
        let stdout = io::stdout();
        let mut handle = stdout.lock();

        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                writeln!(handle, "{}", json)?;
            }
            OutputFormat::Yaml => {
                let yaml = serde_yaml::to_string(data)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                writeln!(handle, "{}", yaml)?;
            }
            OutputFormat::Table => {
                data.print_table(&mut handle, self.color)?;
            }
            OutputFormat::Plain => {
                data.print_table(&mut handle, false)?;
            }
        }

        Ok(())
    }

    /// Print success message
    pub fn success(&self, msg: &str) {
        if self.color {
            println!("\x1b[32m✓\x1b[0m {}", msg);
        } else {
            println!("OK: {}", msg);
        }
    }

    /// Print error message
    pub fn error(&self, msg: &str) {
        if self.color {
            eprintln!("\x1b[31m✗\x1b[0m {}", msg);
        } else {
            eprintln!("ERROR: {}", msg);
        }
    }

    /// Print info message
    pub fn info(&self, msg: &str) {
        if self.color {
            println!("\x1b[34mℹ\x1b[0m {}", msg);
        } else {
            println!("INFO: {}", msg);
        }
    }
}

fn heading<W: Write>(w: &mut W, color: bool, text: &str) -> io::Result<()> {
    if color {
        writeln!(w, "\x1b[1m{}\x1b[0m", text)
    } else {
        writeln!(w, "{}", text)
    }
}

/// Trait for table-printable types
pub trait TablePrint {
    fn print_table<W: Write>(&self, w: &mut W, color: bool) -> io::Result<()>;
}

impl TablePrint for SystemStats {
    fn print_table<W: Write>(&self, w: &mut W, color: bool) -> io::Result<()> {
        heading(w, color, "--- Allocator (linear) ---")?;
        writeln!(w, "Allocation Requests:     {}", self.linear.counters.requests)?;
        writeln!(w, "Successful Allocations:  {}", self.linear.counters.succeeded)?;
        writeln!(w, "Failed Allocations:      {}", self.linear.counters.failed)?;
        writeln!(w, "Success Rate:            {:.2}%", self.linear.success_rate_pct)?;
        writeln!(w, "Utilization:             {:.2}%", self.linear.utilization_pct)?;
        writeln!(w, "Internal Fragmentation:  {} B", self.linear.internal_frag_bytes)?;
        writeln!(
            w,
            "External Fragmentation:  {} B ({:.2}% of free)",
            self.linear.external_frag_bytes, self.linear.external_frag_pct
        )?;

        heading(w, color, "--- Allocator (buddy) ---")?;
        writeln!(w, "Allocation Requests:     {}", self.buddy.counters.requests)?;
        writeln!(w, "Successful Allocations:  {}", self.buddy.counters.succeeded)?;
        writeln!(w, "Failed Allocations:      {}", self.buddy.counters.failed)?;
        writeln!(w, "Success Rate:            {:.2}%", self.buddy.success_rate_pct)?;
        writeln!(
            w,
            "Used:                    {} / {} B ({:.2}%)",
            self.buddy.used_bytes, self.buddy.total_bytes, self.buddy.utilization_pct
        )?;
        writeln!(
            w,
            "Internal Fragmentation:  {} B ({:.2}% of used)",
            self.buddy.internal_frag_bytes, self.buddy.internal_frag_pct
        )?;

        heading(w, color, "--- Virtual Memory ---")?;
        writeln!(w, "Page Hits:               {}", self.vm.page_hits)?;
        writeln!(w, "Page Faults:             {}", self.vm.page_faults)?;
        writeln!(w, "Fault Rate:              {:.2}%", self.vm.fault_rate_pct)?;
        writeln!(w, "Disk Penalty per Fault:  {} cycles", self.vm.disk_penalty)?;
        for proc in &self.vm.per_process {
            writeln!(
                w,
                "PID {}: {} / {} frames used ({} pages)",
                proc.pid, proc.frames_used, self.vm.total_frames, proc.num_pages
            )?;
        }

        for cache in &self.caches {
            heading(w, color, &format!("--- {} Cache ---", cache.name))?;
            writeln!(w, "Policy: {}", cache.policy)?;
            writeln!(w, "Size: {} B | Ways: {}", cache.size, cache.ways)?;
            writeln!(
                w,
                "Hits: {} | Misses: {} | Evictions: {}",
                cache.hits, cache.misses, cache.evictions
            )?;
            writeln!(w, "Hit Ratio: {:.2}%", cache.hit_ratio_pct)?;
        }

        heading(w, color, "--- Cycles ---")?;
        writeln!(w, "Total Cycles:            {}", self.total_cycles)?;
        writeln!(w, "Avg Access Cycles:       {:.2}", self.avg_access_cycles)?;
        Ok(())
    }
}

impl TablePrint for MemoryDump {
    fn print_table<W: Write>(&self, w: &mut W, color: bool) -> io::Result<()> {
        heading(w, color, "----- Memory Map -----")?;
        for block in &self.linear_blocks {
            let end = block.start + block.size - 1;
            match block.id {
                Some(id) => writeln!(
                    w,
                    "[{:#06x} - {:#06x}] USED (id={})",
                    block.start, end, id
                )?,
                None => writeln!(w, "[{:#06x} - {:#06x}] FREE", block.start, end)?,
            }
        }

        heading(w, color, "--- Buddy Free Lists ---")?;
        for entry in &self.buddy_free_lists {
            write!(w, "Order {} ({}): ", entry.order, entry.block_size)?;
            for addr in &entry.addrs {
                write!(w, "[{:#x}] ", addr)?;
            }
            writeln!(w)?;
        }

        if !self.buddy_allocations.is_empty() {
            heading(w, color, "--- Buddy Allocations ---")?;
            for alloc in &self.buddy_allocations {
                writeln!(
                    w,
                    "[{:#06x}] order {} ({} B) requested {} B (id={})",
                    alloc.addr, alloc.order, alloc.block_size, alloc.requested, alloc.id
                )?;
            }
        }
        Ok(())
    }
}

impl TablePrint for PageTableDump {
    fn print_table<W: Write>(&self, w: &mut W, color: bool) -> io::Result<()> {
        heading(w, color, &format!("PID {} Page Table", self.pid))?;
        writeln!(w, "{:<8}{:<8}{:<8}", "Page", "Valid", "Frame")?;
        for (page, entry) in self.entries.iter().enumerate() {
            match entry.frame {
                Some(frame) => writeln!(w, "{:<8}{:<8}{:<8}", page, "yes", frame)?,
                None => writeln!(w, "{:<8}{:<8}{:<8}", page, "no", "-")?,
            }
        }
        Ok(())
    }
}
