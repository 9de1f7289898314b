pub const INSTANCE_OF: &str = "P31";
pub const ENGLISH_WIKIPEDIA: &str = "enwiki";

/// Label languages tried in order before falling back to any label.
pub const ENGLISH_LANGUAGE_TAGS: &[&str] = &["en-gb", "en"];

pub const DEFAULT_PARTICIPANTS: &[&str] = &[
    "United Kingdom",
    "Kingdom of England",
    "Kingdom of Great Britain",
    "British Army",
];

/// Infobox field naming the enclosing conflicts.
pub const PART_OF_FIELD: &str = "partof";

/// Wikidata classes whose instances count as wars, battles or other armed
/// conflicts (subclasses of Q71266556 "warfare and armed conflicts").
pub const CONFLICT_TYPES: &[(&str, &str)] = &[
    ("Q12546", "Crusades"),
    ("Q2490042", "Princely rebellion"),
    ("Q4348173", "absolute war"),
    ("Q1897017", "air battle"),
    ("Q350604", "armed conflict"),
    ("Q178561", "battle"),
    ("Q4927953", "bloodless war"),
    ("Q107637520", "border conflict"),
    ("Q5392931", "cavalry raid"),
    ("Q8465", "civil war"),
    ("Q180684", "conflict"),
    ("Q2659056", "colonial war"),
    ("Q429245", "conventional warfare"),
    ("Q11552344", "decisive warfare"),
    ("Q2518545", "defensive war"),
    ("Q11682254", "dirty war"),
    ("Q77597785", "drug war"),
    ("Q766875", "ethnic conflict"),
    ("Q48767773", "engagement"),
    ("Q21978021", "federal war"),
    ("Q9266805", "general battle"),
    ("Q1190472", "ground warfare"),
    ("Q13573188", "holy war"),
    ("Q1323212", "insurgency"),
    ("Q109311521", "internal armed conflict"),
    ("Q2247326", "limited war"),
    ("Q25512705", "main battle"),
    ("Q15991159", "medieval battle"),
    ("Q814290", "meeting engagement"),
    ("Q831663", "military campaign"),
    ("Q131782363", "military conflict"),
    ("Q131656428", "military convoy"),
    ("Q25416338", "military convoy series"),
    ("Q1384277", "military expedition"),
    ("Q7533291", "military operation"),
    ("Q1348131", "modern warfare"),
    ("Q1261499", "naval battle"),
    ("Q17772965", "naval capture"),
    ("Q743488", "pitched battle"),
    ("Q9377327", "preemptive war"),
    ("Q969619", "preventive war"),
    ("Q864113", "proxy war"),
    ("Q1827102", "religious war"),
    ("Q111660983", "resource war"),
    ("Q3119121", "revolutionary war"),
    ("Q11396978", "sanctions war"),
    ("Q3774758", "sectarian violence"),
    ("Q104212151", "series of wars"),
    ("Q4277662", "short victorious war"),
    ("Q188055", "siege"),
    ("Q12041935", "siege in the Middle Ages"),
    ("Q997267", "skirmish"),
    ("Q718893", "theater of war"),
    ("Q154605", "total war"),
    ("Q232777", "two-front war"),
    ("Q1342628", "unconventional warfare"),
    ("Q7883019", "undeclared war"),
    ("Q198", "war"),
    ("Q842332", "war front"),
    ("Q752646", "war of annihilation"),
    ("Q21994376", "war of independence"),
    ("Q1006311", "war of national liberation"),
    ("Q3119022", "war of pacification"),
    ("Q1348385", "war of succession"),
    ("Q105370834", "war phase"),
    ("Q71266556", "warfare and armed conflicts"),
    ("Q130525743", "wars of individual sovereign"),
    ("Q103495", "world war"),
];

pub fn conflict_label(id: &str) -> Option<&'static str> {
    CONFLICT_TYPES
        .iter()
        .find(|(q, _)| *q == id)
        .map(|(_, label)| *label)
}
