//! Proptest generators for combat inputs.

use proptest::collection::vec;
use proptest::prelude::*;

use crate::damage::{DamageSpec, DamageType};
use crate::engine::ActionChoice;
use crate::skills::{Skill, SkillTag};
use crate::snapshot::{Combatant, Environment, TAG_ELITE, TAG_ENRAGE, TAG_SPIRIT};

pub fn damage_type() -> impl Strategy<Value = DamageType> {
    prop_oneof![
        Just(DamageType::Physical),
        Just(DamageType::Technique),
        Just(DamageType::Spell),
        Just(DamageType::True),
    ]
}

pub fn skill_tag() -> impl Strategy<Value = SkillTag> {
    prop_oneof![
        Just(SkillTag::Area),
        Just(SkillTag::DoubleHit),
        Just(SkillTag::Summon),
        Just(SkillTag::PolarityInvert),
        Just(SkillTag::Drain),
        Just(SkillTag::Burn),
        Just(SkillTag::Shield),
    ]
}

pub fn skill() -> impl Strategy<Value = Skill> {
    (
        "[a-z]{3,8}",
        0i64..20,
        0i64..5,
        damage_type(),
        0.0f64..20.0,
        (0.0f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0),
        any::<bool>(),
        vec(skill_tag(), 0..3),
    )
        .prop_map(|(id, mp_cost, hp_cost, kind, base, (melee, technique, spell), crit, tags)| {
            let spec = DamageSpec::new(kind, base)
                .weights(melee, technique, spell)
                .crit(crit);
            tags.into_iter().fold(
                Skill::new(id, mp_cost, spec).with_hp_cost(hp_cost),
                Skill::with_tag,
            )
        })
}

pub fn monster() -> impl Strategy<Value = Combatant> {
    (
        "[a-z]{2,6}",
        1i64..200,
        0.0f64..30.0,
        0.0f64..10.0,
        0.0f64..=0.5,
        0u32..5,
        prop_oneof![
            3 => Just(None),
            1 => Just(Some(TAG_ELITE)),
            1 => Just(Some(TAG_ENRAGE)),
            1 => Just(Some(TAG_SPIRIT)),
        ],
    )
        .prop_map(|(id, hp, atk, def, crit_rate, realm, tag)| {
            let mut monster = Combatant::new(id, hp, atk);
            monster.def = def;
            monster.crit_rate = crit_rate;
            monster.realm = realm;
            match tag {
                Some(tag) => monster.with_tag(tag),
                None => monster,
            }
        })
}

/// Monsters with distinct ids.
pub fn roster() -> impl Strategy<Value = Vec<Combatant>> {
    vec(monster(), 1..4).prop_map(|monsters| {
        monsters
            .into_iter()
            .enumerate()
            .map(|(index, mut monster)| {
                monster.id = format!("{}_{}", monster.id, index);
                monster
            })
            .collect()
    })
}

pub fn player() -> impl Strategy<Value = Combatant> {
    (
        20i64..300,
        0i64..80,
        1.0f64..30.0,
        0.0f64..20.0,
        0.0f64..=0.6,
        0u32..5,
        vec(skill(), 0..3),
    )
        .prop_map(|(hp, mp, atk, spell, crit_rate, realm, skills)| {
            let mut player = Combatant::new("hero", hp, atk).with_mana(mp, mp);
            player.spell = spell;
            player.matk = spell;
            player.crit_rate = crit_rate;
            player.realm = realm;
            skills.into_iter().fold(player, Combatant::with_skill)
        })
}

pub fn environment() -> impl Strategy<Value = Environment> {
    (0u32..5, -1.0f64..=1.0).prop_map(|(difficulty, polarity)| Environment {
        map_id: "proving_ground".to_string(),
        difficulty,
        polarity,
        world_tag: String::new(),
    })
}

/// Player actions. Named skills may or may not exist on the caster.
pub fn action() -> impl Strategy<Value = ActionChoice> {
    prop_oneof![
        4 => Just(ActionChoice::Basic),
        1 => skill().prop_map(ActionChoice::SkillOverride),
        1 => "[a-z]{3,8}".prop_map(ActionChoice::NamedSkill),
    ]
}
