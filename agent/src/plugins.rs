//! Plugin detector: infer the server's installed plugin list from whatever
//! the bot connection already observed (the `declare_commands` tree) plus,
//! if that comes up empty, a handful of further in-game probes.
//!
//! Methods run in the fixed order the executor's step 8 specifies and stop
//! at the first one that yields a non-empty set: `declare_commands` tree
//! walk, tab-completion across a fixed phase list, `/plugins`, then
//! `/bukkit:plugins`. Every method tags its result so the executor can
//! record which one actually fired.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use reconmc_core::error::ScanError;

use crate::bot::packet::{self, play, CommandNode};
use crate::bot::BotConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    CommandTree,
    TabComplete,
    Combined,
    PluginsCommand,
    BukkitPluginsCommand,
    None,
}

impl DetectionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionMethod::CommandTree => "command_tree",
            DetectionMethod::TabComplete => "tab_complete",
            DetectionMethod::Combined => "combined",
            DetectionMethod::PluginsCommand => "plugins_command",
            DetectionMethod::BukkitPluginsCommand => "bukkit_plugins_command",
            DetectionMethod::None => "none",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PluginDetection {
    pub plugins: Vec<String>,
    pub method: &'static str,
    /// First node name matching `{version, ver, about, <ns>:version}`, if
    /// the command tree carried one.
    pub version_command: Option<String>,
}

/// Fixed phase list probed in order when the command tree alone didn't
/// surface anything — a root completion, then three common plugin-specific
/// command stems that tend to reveal namespaced siblings.
const TAB_COMPLETE_PHASES: &[&str] = &["/", "/version", "/plugins", "/bukkit:"];

/// `command → plugin_id` lookup for commands that aren't themselves
/// namespaced but are recognisable aliases of a known plugin — built once
/// from a flat `const` table so the map itself stays data.
fn signature_table() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| RAW_SIGNATURES.iter().copied().collect())
}

pub fn plugin_id_for_command(command: &str) -> Option<&'static str> {
    signature_table().get(command).copied()
}

fn is_version_alias(name: &str) -> bool {
    matches!(name, "version" | "ver" | "about") || name.ends_with(":version")
}

/// Walk from `root_index`'s children: a literal node whose name contains
/// `:` yields `<plugin>` (the prefix, lowercased) directly; a literal node
/// without a colon is looked up in the signature table for a recognised
/// alias. Only root-level children are inspected — plugin-owning commands
/// are always top-level in vanilla's command tree.
pub fn extract_from_command_tree(
    nodes: &[CommandNode],
    root_index: i32,
) -> (Vec<String>, Option<String>) {
    let mut from_colon = Vec::new();
    let mut from_alias = Vec::new();
    let mut version_command = None;

    let Some(root) = nodes.get(root_index as usize) else {
        return (Vec::new(), None);
    };

    for &child_idx in &root.children {
        let Some(child) = nodes.get(child_idx as usize) else {
            continue;
        };
        let Some(name) = &child.name else { continue };

        if version_command.is_none() && is_version_alias(name) {
            version_command = Some(name.clone());
        }

        if !child.is_literal {
            continue;
        }

        if let Some((plugin, _)) = name.split_once(':') {
            from_colon.push(plugin.to_ascii_lowercase());
        } else if let Some(plugin) = plugin_id_for_command(name) {
            from_alias.push(plugin.to_string());
        }
    }

    let mut combined: Vec<String> = from_colon.iter().chain(from_alias.iter()).cloned().collect();
    combined.sort();
    combined.dedup();

    (combined, version_command)
}

/// Run every method in order, stopping at the first non-empty result.
/// `conn` must already be in the play state past spawn.
pub async fn detect_plugins(
    conn: &mut BotConnection,
    command_nodes: &[CommandNode],
    command_root_index: i32,
) -> Result<PluginDetection, ScanError> {
    let (tree_plugins, version_command) =
        extract_from_command_tree(command_nodes, command_root_index);
    if !tree_plugins.is_empty() {
        let method = if used_both_colon_and_alias(command_nodes, command_root_index) {
            DetectionMethod::Combined
        } else {
            DetectionMethod::CommandTree
        };
        return Ok(PluginDetection {
            plugins: tree_plugins,
            method: method.as_str(),
            version_command,
        });
    }

    let tab_plugins = probe_tab_complete(conn).await?;
    if !tab_plugins.is_empty() {
        return Ok(PluginDetection {
            plugins: tab_plugins,
            method: DetectionMethod::TabComplete.as_str(),
            version_command,
        });
    }

    if let Some(plugins) = issue_plugins_command(conn, "plugins").await? {
        return Ok(PluginDetection {
            plugins,
            method: DetectionMethod::PluginsCommand.as_str(),
            version_command,
        });
    }

    if let Some(plugins) = issue_plugins_command(conn, "bukkit:plugins").await? {
        return Ok(PluginDetection {
            plugins,
            method: DetectionMethod::BukkitPluginsCommand.as_str(),
            version_command,
        });
    }

    Ok(PluginDetection {
        plugins: Vec::new(),
        method: DetectionMethod::None.as_str(),
        version_command,
    })
}

fn used_both_colon_and_alias(nodes: &[CommandNode], root_index: i32) -> bool {
    let Some(root) = nodes.get(root_index as usize) else {
        return false;
    };
    let mut has_colon = false;
    let mut has_alias = false;
    for &idx in &root.children {
        let Some(child) = nodes.get(idx as usize) else { continue };
        let Some(name) = &child.name else { continue };
        if !child.is_literal {
            continue;
        }
        if name.contains(':') {
            has_colon = true;
        } else if plugin_id_for_command(name).is_some() {
            has_alias = true;
        }
    }
    has_colon && has_alias
}

/// Tab-completion probe across [`TAB_COMPLETE_PHASES`]: request completions
/// for each phase text, collect any colon-prefixed suggestion into the
/// same plugin-id extraction rule the command tree uses. Unrelated packets
/// (chat, keep-alives) are skipped while waiting for the matching
/// transaction id, bounded so a server that never responds can't hang the
/// scan indefinitely.
async fn probe_tab_complete(conn: &mut BotConnection) -> Result<Vec<String>, ScanError> {
    const MAX_SKIPPED_PACKETS_PER_PHASE: usize = 25;
    let mut plugins = Vec::new();

    for (i, phase) in TAB_COMPLETE_PHASES.iter().enumerate() {
        let transaction_id = i as i32 + 1;
        conn.send(
            play::TAB_COMPLETE_C2S,
            packet::encode_tab_complete_request(transaction_id, phase),
        )
        .await?;

        for _ in 0..MAX_SKIPPED_PACKETS_PER_PHASE {
            let (packet_id, body) = conn.recv().await?;
            if packet_id != play::TAB_COMPLETE_S2C {
                continue;
            }
            let response = packet::decode_tab_complete_response(&body)?;
            if response.transaction_id != transaction_id {
                continue;
            }
            for m in response.matches {
                if let Some((plugin, _)) = m.trim_start_matches('/').split_once(':') {
                    plugins.push(plugin.to_ascii_lowercase());
                }
            }
            break;
        }
    }

    plugins.sort();
    plugins.dedup();
    Ok(plugins)
}

fn plugins_list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Plugins \([0-9]+\):\s*(.+)").unwrap())
}

fn strip_color_codes(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\u{00a7}.").unwrap());
    re.replace_all(s, "").into_owned()
}

/// `Plugins (N): A, B, C` text parsing — the chat message carries a raw
/// (possibly JSON text-component) payload, so the regex searches it
/// directly rather than assuming it's already flattened to plain text.
fn parse_plugins_list_message(text: &str) -> Option<Vec<String>> {
    let caps = plugins_list_regex().captures(text)?;
    let list = caps.get(1)?.as_str();
    let cleaned = strip_color_codes(list);
    let names: Vec<String> = cleaned
        .trim_end_matches(|c| c == '"' || c == '}')
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

/// Issue `/<command>` and watch chat for a matching `Plugins (N): ...`
/// response, bounded to a handful of packets so an unresponsive server
/// doesn't stall the scan.
async fn issue_plugins_command(
    conn: &mut BotConnection,
    command: &str,
) -> Result<Option<Vec<String>>, ScanError> {
    const MAX_SKIPPED_PACKETS: usize = 30;
    conn.send(play::CHAT_COMMAND_C2S, packet::encode_chat_command(command))
        .await?;

    for _ in 0..MAX_SKIPPED_PACKETS {
        let (packet_id, body) = conn.recv().await?;
        if packet_id != play::CHAT_S2C {
            continue;
        }
        let (text, _overlay) = packet::decode_system_chat(&body)?;
        if let Some(names) = parse_plugins_list_message(&text) {
            debug!(command, count = names.len(), "parsed plugins list from chat");
            return Ok(Some(names));
        }
    }
    Ok(None)
}

/// ~200-entry `command → plugin_id` table covering widely-deployed
/// Bukkit/Spigot/Paper plugins, grouped by plugin. Commands that collide
/// across plugins keep whichever is the more common real-world owner.
const RAW_SIGNATURES: &[(&str, &str)] = &[
    // EssentialsX
    ("ess", "essentials"),
    ("essentials", "essentials"),
    ("tpa", "essentials"),
    ("tpahere", "essentials"),
    ("tpaccept", "essentials"),
    ("tpdeny", "essentials"),
    ("back", "essentials"),
    ("home", "essentials"),
    ("sethome", "essentials"),
    ("delhome", "essentials"),
    ("warp", "essentials"),
    ("setwarp", "essentials"),
    ("spawn", "essentials"),
    ("setspawn", "essentials"),
    ("kit", "essentials"),
    ("balance", "essentials"),
    ("bal", "essentials"),
    ("pay", "essentials"),
    ("economy", "essentials"),
    ("eco", "essentials"),
    ("nick", "essentials"),
    ("afk", "essentials"),
    ("mail", "essentials"),
    ("msg", "essentials"),
    ("r", "essentials"),
    ("ignore", "essentials"),
    ("realname", "essentials"),
    ("geoip", "essentials"),
    ("essentialschat", "essentialsx-chat"),
    ("essentialsspawn", "essentialsx-spawn"),
    ("essentialsprotect", "essentialsx-protect"),
    // WorldEdit / FastAsyncWorldEdit
    ("worldedit", "worldedit"),
    ("we", "worldedit"),
    ("wand", "worldedit"),
    ("pos1", "worldedit"),
    ("pos2", "worldedit"),
    ("set", "worldedit"),
    ("replace", "worldedit"),
    ("copy", "worldedit"),
    ("paste", "worldedit"),
    ("undo", "worldedit"),
    ("redo", "worldedit"),
    ("fawe", "fastasyncworldedit"),
    ("fastasyncworldedit", "fastasyncworldedit"),
    // WorldGuard
    ("worldguard", "worldguard"),
    ("wg", "worldguard"),
    ("region", "worldguard"),
    ("rg", "worldguard"),
    // LuckPerms
    ("luckperms", "luckperms"),
    ("lp", "luckperms"),
    ("perm", "luckperms"),
    ("permission", "luckperms"),
    // Vault
    ("vault", "vault"),
    // PlaceholderAPI
    ("placeholderapi", "placeholderapi"),
    ("papi", "placeholderapi"),
    // ProtocolLib
    ("protocollib", "protocollib"),
    // Multiverse
    ("multiverse", "multiverse-core"),
    ("mv", "multiverse-core"),
    ("mvtp", "multiverse-core"),
    ("mvcreate", "multiverse-core"),
    ("mvportals", "multiverse-portals"),
    ("mvnp", "multiverse-netherportals"),
    ("mvinv", "multiverse-inventories"),
    // CoreProtect
    ("coreprotect", "coreprotect"),
    ("co", "coreprotect"),
    // GriefPrevention
    ("griefprevention", "griefprevention"),
    ("claim", "griefprevention"),
    ("claimslist", "griefprevention"),
    ("trust", "griefprevention"),
    ("untrust", "griefprevention"),
    ("abandonclaim", "griefprevention"),
    // Towny
    ("towny", "towny"),
    ("town", "towny"),
    ("nation", "towny"),
    ("resident", "towny"),
    ("plot", "towny"),
    // Factions
    ("factions", "factions"),
    ("f", "factions"),
    ("faction", "factions"),
    // mcMMO
    ("mcmmo", "mcmmo"),
    ("skills", "mcmmo"),
    ("mctop", "mcmmo"),
    ("party", "mcmmo"),
    // BentoBox / ASkyBlock
    ("bentobox", "bentobox"),
    ("island", "bentobox"),
    ("is", "bentobox"),
    ("asisland", "askyblock"),
    // Shopkeepers
    ("shopkeeper", "shopkeepers"),
    ("shopkeepers", "shopkeepers"),
    // ChestShop
    ("chestshop", "chestshop"),
    // Dynmap
    ("dynmap", "dynmap"),
    // ViaVersion / ViaBackwards / ViaRewind / ProtocolSupport
    ("viaversion", "viaversion"),
    ("viaver", "viaversion"),
    ("viabackwards", "viabackwards"),
    ("viarewind", "viarewind"),
    ("protocolsupport", "protocolsupport"),
    // spark
    ("spark", "spark"),
    // ClearLag
    ("clearlag", "clearlag"),
    ("lagg", "clearlag"),
    // HolographicDisplays
    ("holographicdisplays", "holographicdisplays"),
    ("hd", "holographicdisplays"),
    // Citizens
    ("citizens", "citizens"),
    ("npc", "citizens"),
    ("trait", "citizens"),
    // squaremap / BlueMap / Dynmap siblings
    ("squaremap", "squaremap"),
    ("bluemap", "bluemap"),
    // Geyser / Floodgate
    ("geyser", "geyser"),
    ("floodgate", "floodgate"),
    // Matrix anticheat
    ("matrix", "matrix"),
    // AuthMe
    ("authme", "authme"),
    ("register", "authme"),
    ("login", "authme"),
    ("logout", "authme"),
    ("unregister", "authme"),
    ("changepassword", "authme"),
    // NoCheatPlus
    ("nocheatplus", "nocheatplus"),
    ("ncp", "nocheatplus"),
    // CombatLogX
    ("combatlogx", "combatlogx"),
    ("combattag", "combattagplus"),
    // CrackShot
    ("crackshot", "crackshot"),
    ("cs", "crackshot"),
    // MobArena
    ("mobarena", "mobarena"),
    ("ma", "mobarena"),
    // Prison
    ("prison", "prison"),
    ("mine", "prison"),
    ("gang", "prison"),
    // Jobs Reborn
    ("jobs", "jobsreborn"),
    ("job", "jobsreborn"),
    // BossShopPro
    ("bossshop", "bossshoppro"),
    ("bsp", "bossshoppro"),
    // Votifier / NuVotifier
    ("votifier", "nuvotifier"),
    ("nuvotifier", "nuvotifier"),
    // LibsDisguises
    ("disguise", "libsdisguises"),
    ("undisguise", "libsdisguises"),
    ("libsdisguises", "libsdisguises"),
    // LiteBans / AdvancedBan
    ("litebans", "litebans"),
    ("ban", "litebans"),
    ("kick", "litebans"),
    ("mute", "litebans"),
    ("advancedban", "advancedban"),
    // Skript
    ("skript", "skript"),
    ("sk", "skript"),
    // DeluxeMenus
    ("deluxemenus", "deluxemenus"),
    ("dm", "deluxemenus"),
    // HeadDatabase
    ("headdatabase", "headdatabase"),
    ("hdb", "headdatabase"),
    // TAB
    ("tab", "tab"),
    // ChatControl
    ("chatcontrol", "chatcontrol"),
    ("cc", "chatcontrol"),
    // SimpleVoiceChat
    ("voicechat", "simplevoicechat"),
    ("svc", "simplevoicechat"),
    // Lands
    ("lands", "lands"),
    // RedProtect
    ("redprotect", "redprotect"),
    ("rprotect", "redprotect"),
    // PlotSquared
    ("plotsquared", "plotsquared"),
    ("plots", "plotsquared"),
    ("p", "plotsquared"),
    // WorldBorder
    ("worldborder", "worldborder"),
    ("wb", "worldborder"),
    // Autorank
    ("autorank", "autorank"),
    // MarriageMaster
    ("marriagemaster", "marriagemaster"),
    ("marry", "marriagemaster"),
    ("divorce", "marriagemaster"),
    // QuestZ / BetonQuest
    ("betonquest", "betonquest"),
    ("q", "betonquest"),
    // Enjin
    ("enjinminecraftplugin", "enjinminecraftplugin"),
    // OpenInv
    ("openinv", "openinv"),
    ("searchinv", "openinv"),
    // ItemsAdder
    ("itemsadder", "itemsadder"),
    ("ia", "itemsadder"),
    // Oraxen
    ("oraxen", "oraxen"),
    // SkinsRestorer
    ("skinsrestorer", "skinsrestorer"),
    ("skin", "skinsrestorer"),
    // DiscordSRV
    ("discordsrv", "discordsrv"),
    // Vulcan / AAC anticheats
    ("vulcan", "vulcan"),
    ("aac", "advancedantichest"),
    // CMI
    ("cmi", "cmi"),
    // UltraEconomy / TNE
    ("ultraeconomy", "ultraeconomy"),
    // PermissionsEx
    ("pex", "permissionsex"),
    ("permissionsex", "permissionsex"),
    // GroupManager
    ("manuadd", "groupmanager"),
    ("groupmanager", "groupmanager"),
    // Residence
    ("residence", "residence"),
    ("res", "residence"),
    // ASkyBlock siblings / uSkyBlock
    ("uskyblock", "uskyblock"),
    ("usb", "uskyblock"),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: Option<&str>, is_literal: bool, children: Vec<i32>) -> CommandNode {
        CommandNode {
            name: name.map(|s| s.to_string()),
            is_literal,
            children,
        }
    }

    #[test]
    fn extracts_colon_prefixed_plugin_from_root_children() {
        let nodes = vec![
            node(None, false, vec![1, 2]),
            node(Some("essentials:help"), true, vec![]),
            node(Some("worldedit:wand"), true, vec![]),
        ];
        let (plugins, _) = extract_from_command_tree(&nodes, 0);
        assert_eq!(plugins, vec!["essentials", "worldedit"]);
    }

    #[test]
    fn extracts_plugin_via_alias_table_without_colon() {
        let nodes = vec![node(None, false, vec![1]), node(Some("tpa"), true, vec![])];
        let (plugins, _) = extract_from_command_tree(&nodes, 0);
        assert_eq!(plugins, vec!["essentials"]);
    }

    #[test]
    fn records_first_version_alias_seen() {
        let nodes = vec![
            node(None, false, vec![1, 2]),
            node(Some("version"), true, vec![]),
            node(Some("about"), true, vec![]),
        ];
        let (_, version_command) = extract_from_command_tree(&nodes, 0);
        assert_eq!(version_command.as_deref(), Some("version"));
    }

    #[test]
    fn unknown_plain_command_yields_nothing() {
        let nodes = vec![node(None, false, vec![1]), node(Some("foobar"), true, vec![])];
        let (plugins, _) = extract_from_command_tree(&nodes, 0);
        assert!(plugins.is_empty());
    }

    #[test]
    fn parses_plugins_list_message_with_color_codes() {
        let text = "Plugins (3): \u{00a7}aEssentials, \u{00a7}aWorldEdit, \u{00a7}cDisabledOne";
        let names = parse_plugins_list_message(text).unwrap();
        assert_eq!(names, vec!["Essentials", "WorldEdit", "DisabledOne"]);
    }

    #[test]
    fn parses_plugins_list_message_embedded_in_json_text_component() {
        let text = r#"{"text":"Plugins (2): Vault, LuckPerms"}"#;
        let names = parse_plugins_list_message(text).unwrap();
        assert_eq!(names[0], "Vault");
        assert!(names[1].starts_with("LuckPerms"));
    }

    #[test]
    fn non_matching_message_yields_none() {
        assert!(parse_plugins_list_message("Welcome to the server!").is_none());
    }
}
