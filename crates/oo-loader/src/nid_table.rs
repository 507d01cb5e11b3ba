//! Static NID hash -> symbol name table
//!
//! The snapshot below is produced offline from the ps4libdoc dataset and
//! covers the symbols the built-in HLE modules care about; everything else
//! falls back to the raw hash, which keeps unknown symbols loadable and
//! greppable in the logs.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Lookup table from 11-character NID hashes to canonical symbol names
#[derive(Debug, Clone, Default)]
pub struct NidTable {
    map: HashMap<String, String>,
}

static BUILTIN: Lazy<NidTable> = Lazy::new(|| NidTable::from_entries(GENERATED));

impl NidTable {
    /// The built-in snapshot generated from ps4libdoc
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    pub fn from_entries(entries: &[(&str, &str)]) -> Self {
        Self {
            map: entries
                .iter()
                .map(|(nid, name)| (nid.to_string(), name.to_string()))
                .collect(),
        }
    }

    /// Resolve a hash to its symbol name, returning the hash itself on miss
    pub fn lookup<'a>(&'a self, nid: &'a str) -> &'a str {
        self.map.get(nid).map(String::as_str).unwrap_or(nid)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// Generated table. Do not edit by hand.
static GENERATED: &[(&str, &str)] = &[
    ("1jfXLRVzisc", "sceKernelUsleep"),
    ("4J2sUJmuHZQ", "scePthreadExit"),
    ("6XG4B33N09g", "sceKernelSleep"),
    ("6f-Ibn5fJv8", "sceKernelGetCpumode"),
    ("7H0iTOciTLo", "scePthreadMutexLock"),
    ("9BcDykPmo1I", "__error"),
    ("9UK1vLZQft4", "scePthreadMutexUnlock"),
    ("Ai6A0R9dXGY", "sceKernelGetProcessTime"),
    ("BPE9s9vQQXo", "sceKernelMmap"),
    ("DRuBt2pvICk", "sceKernelRead"),
    ("EotR8a3ASf4", "sceKernelIsNeoMode"),
    ("F6e0kwo4cnk", "scePthreadGetthreadid"),
    ("FJrT5LuUBAU", "scePthreadExitThread"),
    ("FN4gaPmuFV8", "sceKernelWrite"),
    ("HoLVWNanBBc", "sceKernelGetdirentries"),
    ("IBbInpuFQMI", "sceKernelStat"),
    ("MU2VlOXnrTc", "sceKernelGetPageTableStats"),
    ("NNtFaKJbPt0", "sceKernelClose"),
    ("OMDRKKAZ8I4", "sceKernelDebugRaiseException"),
    ("Ou3iL1abvng", "sceKernelFstat"),
    ("QBi7HCK03hw", "sceKernelClockGettime"),
    ("Qhv5ARAoOEc", "sceKernelMunmap"),
    ("UqDGjXA5yUM", "sceKernelMemoryPoolExpand"),
    ("WB66evu8bsU", "sceKernelGetCompiledSdkVersion"),
    ("WslcK1FQcGI", "sceKernelCheckReachability"),
    ("XVL8So3QJUk", "sceKernelConnect"),
    ("YSHRBRLn2pI", "_writev"),
    ("ZCPz1hmGe3w", "scePthreadSelf"),
    ("aPcyptbOiZs", "sceKernelSetVirtualRangeName"),
    ("bnZxYgAFeA0", "sceKernelGetSystemSwVersion"),
    ("cDv+aeQIdiE", "scePthreadMutexInit"),
    ("eLdDw6l0-bU", "sceKernelSendNotificationRequest"),
    ("fFxGkxF2bVo", "sceKernelMlock"),
    ("fTx66l06iUk", "sceKernelFsync"),
    ("g1nIWw+2Fcs", "sceKernelOpen"),
    ("gYdriFTdgmk", "sceKernelLseek"),
    ("juh+PTdB9B4", "_sceKernelRtldThreadAtexitIncrement"),
    ("kbw4UHPoYSQ", "sceKernelDlsym"),
    ("lLMT9vJAPKw", "sceKernelAllocateDirectMemory"),
    ("mL8NDH86iQI", "sceKernelMapNamedFlexibleMemory"),
    ("nqvle-jNZmU", "sceGnmSubmitDone"),
    ("oL-Y+vnTrBg", "sceGnmFlushGarlic"),
    ("pO96TwzOm5E", "sceKernelGetDirectMemorySize"),
    ("rTXw65xmLIA", "sceKernelAllocateMainDirectMemory"),
    ("tsvEmnenz48", "__stack_chk_guard"),
    ("vNe1w4diLCs", "__tls_get_addr"),
    ("wzvqT4UqKX8", "sceKernelLoadStartModule"),
    ("xeYO4u7uyJ0", "sceKernelOpenEport"),
    ("yH6Dv5Dr03Y", "sceGnmDrawInitDefaultHardwareState"),
    ("yS8U2TGCe1A", "scePthreadYield"),
];
