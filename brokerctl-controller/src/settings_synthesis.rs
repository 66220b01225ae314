use brokerctl_core::{AddressKind, AddressResource, AddressSettings};

const PAGE_POLICY: &str = "PAGE";

/// Redelivery defaults applied alongside a dead-letter address.
const DEFAULT_MAX_DELIVERY_ATTEMPTS: i64 = 10;
const DEFAULT_REDELIVERY_DELAY: i64 = 0;
const DEFAULT_REDELIVERY_MULTIPLIER: f64 = 1.0;
const DEFAULT_MAX_REDELIVERY_DELAY: i64 = 0;

fn overlay_nonzero(value: Option<i64>, apply: impl FnOnce(i64)) -> bool {
    match value {
        Some(v) if v != 0 => {
            apply(v);
            true
        }
        _ => false,
    }
}

/// Synthesizes the settings override of one address from its policy intent.
///
/// Starts from a copy of the root settings and overlays the memory share, TTL bounds,
/// dead-letter and expiry addresses and redelivery policy the address asks for. Returns `None`
/// when there is no budget, no policy intent, or nothing to overlay. Zero values count as
/// unset.
///
/// The dead-letter and expiry addresses of the resource are only applied alongside a policy
/// intent; an address that declares them without one gets no override at all.
pub fn generate_address_settings(
    root: &AddressSettings,
    address: &AddressResource,
    global_max_size: i64,
) -> Option<AddressSettings> {
    if global_max_size <= 0 {
        return None;
    }
    let policy = address.policy.as_ref()?;
    let mut settings = root.clone();
    let mut updated = 0;

    if matches!(address.kind, AddressKind::Queue | AddressKind::Subscription) {
        if let Some(share) = policy.plan.as_ref().and_then(|plan| plan.allocation()) {
            let mut max_size_bytes = (share * global_max_size as f64).round() as i64;
            let page_size_bytes = settings.page_size_bytes().unwrap_or(0);
            if settings.address_full_message_policy() == Some(PAGE_POLICY) && page_size_bytes > 0 {
                // the broker rejects a max size below the page size
                max_size_bytes = max_size_bytes.max(page_size_bytes);
            } else {
                settings.set_page_size_bytes(-1);
            }
            settings.set_max_size_bytes(max_size_bytes);
            updated += 1;
        }
    }

    let not_subscription = address.kind != AddressKind::Subscription;

    if not_subscription {
        if let Some(ttl) = &policy.message_ttl {
            if overlay_nonzero(ttl.minimum, |v| settings.set_min_expiry_delay(v)) {
                updated += 1;
            }
            if overlay_nonzero(ttl.maximum, |v| settings.set_max_expiry_delay(v)) {
                updated += 1;
            }
        }

        if let Some(dla) = address.deadletter.as_deref().filter(|d| !d.is_empty()) {
            settings.set_dla(dla);
            settings.set_max_delivery_attempts(DEFAULT_MAX_DELIVERY_ATTEMPTS);
            settings.set_redelivery_delay(DEFAULT_REDELIVERY_DELAY);
            settings.set_redelivery_multiplier(DEFAULT_REDELIVERY_MULTIPLIER);
            settings.set_max_redelivery_delay(DEFAULT_MAX_REDELIVERY_DELAY);
            updated += 1;
        }
        if let Some(expiry) = address.expiry.as_deref().filter(|e| !e.is_empty()) {
            settings.set_expiry_address(expiry);
            updated += 1;
        }

        if let Some(redelivery) = &policy.message_redelivery {
            if overlay_nonzero(redelivery.maximum_delivery_attempts, |v| {
                settings.set_max_delivery_attempts(v)
            }) {
                updated += 1;
            }
            if overlay_nonzero(redelivery.redelivery_delay, |v| settings.set_redelivery_delay(v)) {
                updated += 1;
            }
            if let Some(multiplier) = redelivery.redelivery_delay_multiplier.filter(|m| *m != 0.0) {
                settings.set_redelivery_multiplier(multiplier);
                updated += 1;
            }
            if overlay_nonzero(redelivery.maximum_delivery_delay, |v| {
                settings.set_max_redelivery_delay(v)
            }) {
                updated += 1;
            }
        }
    }

    (updated > 0).then_some(settings)
}

#[cfg(test)]
#[path = "settings_synthesis_test.rs"]
mod settings_synthesis_test;
